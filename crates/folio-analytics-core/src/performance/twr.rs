use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AnalyticsError;
use crate::types::*;
use crate::AnalyticsResult;

const DAYS_PER_YEAR: Decimal = dec!(365.25);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A chronological event stream of external flows and valuations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWeightedInput {
    pub events: Vec<CashFlowEvent>,
}

/// One chain-linked sub-period between consecutive valuations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Portfolio value at the opening valuation (zero before the first one).
    pub start_value: Money,
    pub end_value: Money,
    /// Net external capital added during the period (positive = capital in).
    pub net_flow: Money,
    pub period_return: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWeightedOutput {
    pub cumulative_return: Rate,
    pub cumulative_return_percentage: Decimal,
    pub annualized_return: Rate,
    pub periods: Vec<SubPeriod>,
    pub period_count: usize,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Time-weighted return by chain-linking flow-adjusted sub-period returns.
///
/// Every `Valuation` event closes a sub-period; external flows between two
/// valuations adjust the period's base so that deposits and withdrawals do
/// not distort the return. This isolates manager performance from the
/// investor's cash-flow timing.
pub fn calculate_time_weighted_return(
    input: &TimeWeightedInput,
) -> AnalyticsResult<ComputationOutput<TimeWeightedOutput>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    validate(&input.events)?;
    let events = &input.events;

    let mut periods: Vec<SubPeriod> = Vec::new();
    let mut growth = Decimal::ONE;
    let mut start_value = Decimal::ZERO;
    let mut net_flow = Decimal::ZERO;
    let mut period_start = events[0].date;
    let mut have_base = false;

    for event in events {
        if event.kind.is_external_flow() {
            // Negative amounts are capital in, so flip the sign.
            net_flow -= event.amount;
            have_base = true;
        } else if !have_base {
            // Leading valuation establishes the opening base.
            start_value = event.amount;
            period_start = event.date;
            have_base = true;
        } else {
            let base = start_value + net_flow;
            if base.is_zero() {
                return Err(AnalyticsError::ZeroStartValue { date: event.date });
            }
            let period_return = event.amount / base - Decimal::ONE;
            growth *= Decimal::ONE + period_return;
            periods.push(SubPeriod {
                start_date: period_start,
                end_date: event.date,
                start_value,
                end_value: event.amount,
                net_flow,
                period_return,
            });
            start_value = event.amount;
            net_flow = Decimal::ZERO;
            period_start = event.date;
        }
    }

    if periods.is_empty() {
        return Err(AnalyticsError::InsufficientData(
            "time-weighted return requires at least one valuation closing a period".into(),
        ));
    }

    let cumulative_return = growth - Decimal::ONE;
    let span_days = (events[events.len() - 1].date - events[0].date).num_days();
    let annualized_return = annualize(cumulative_return, span_days);

    let output = TimeWeightedOutput {
        cumulative_return,
        cumulative_return_percentage: (cumulative_return * dec!(100)).round_dp(PERCENTAGE_DP),
        annualized_return,
        period_count: periods.len(),
        periods,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Time-Weighted Return (Chain-Linked)",
        &serde_json::json!({
            "events": events.len(),
            "span_days": span_days,
            "day_count_convention": "365.25",
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Geometric annualization for spans beyond one year; shorter spans report
/// the cumulative return unscaled.
fn annualize(cumulative_return: Rate, span_days: i64) -> Rate {
    if span_days <= 365 {
        return cumulative_return;
    }
    let growth = Decimal::ONE + cumulative_return;
    if growth <= Decimal::ZERO {
        // Total loss cannot compound; cap at -100%.
        return Decimal::NEGATIVE_ONE;
    }
    let years = Decimal::from(span_days) / DAYS_PER_YEAR;
    growth.powd(Decimal::ONE / years) - Decimal::ONE
}

fn validate(events: &[CashFlowEvent]) -> AnalyticsResult<()> {
    if events.len() < 2 {
        return Err(AnalyticsError::InsufficientData(format!(
            "time-weighted return requires at least 2 events, got {}",
            events.len()
        )));
    }
    for pair in events.windows(2) {
        if pair[1].date < pair[0].date {
            return Err(AnalyticsError::InvalidInput {
                field: "events".into(),
                reason: format!(
                    "events must be in chronological order ({} precedes {})",
                    pair[1].date, pair[0].date
                ),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
