use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AnalyticsError;
use crate::types::*;
use crate::AnalyticsResult;

const CONVERGENCE_THRESHOLD: Decimal = dec!(0.0000001);
const DERIVATIVE_THRESHOLD: Decimal = dec!(0.0000000001);
const MAX_NEWTON_ITERATIONS: u32 = 100;
const MAX_BISECTION_ITERATIONS: u32 = 200;
const RATE_FLOOR: Decimal = dec!(-0.99);
const RATE_CEILING: Decimal = dec!(100);
const BISECTION_LOW: Decimal = dec!(-0.9999);
const BISECTION_HIGH: Decimal = dec!(10);
const DAYS_PER_YEAR: Decimal = dec!(365);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Dated cash flows for the internal-rate-of-return equation. The terminal
/// portfolio value enters as a positive flow (usually a `Valuation` event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyWeightedInput {
    pub flows: Vec<CashFlowEvent>,
}

/// Which root finder produced the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    NewtonRaphson,
    Bisection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyWeightedOutput {
    /// Annualized internal rate of return as a fraction.
    pub annualized_rate: Rate,
    pub annualized_rate_percentage: Decimal,
    pub iterations: u32,
    pub solver: SolverKind,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Money-weighted return: the rate r solving sum(CF_i / (1+r)^(t_i/365)) = 0,
/// with day counts measured from the first flow's date.
///
/// Newton-Raphson from a 10% guess is the primary solver; on a flat
/// derivative or iteration exhaustion it falls back to bisection over
/// [-99.99%, 1000%], recording a warning.
pub fn calculate_money_weighted_return(
    input: &MoneyWeightedInput,
) -> AnalyticsResult<ComputationOutput<MoneyWeightedOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate(&input.flows)?;
    let flows = &input.flows;

    // Exponents in years, relative to the first flow.
    let base_date = flows[0].date;
    let times: Vec<Decimal> = flows
        .iter()
        .map(|f| Decimal::from((f.date - base_date).num_days()) / DAYS_PER_YEAR)
        .collect();

    let (rate, iterations, solver) = match newton_raphson(flows, &times) {
        Some((rate, iterations)) => (rate, iterations, SolverKind::NewtonRaphson),
        None => {
            warnings.push(
                "Newton-Raphson did not converge; fell back to bisection".to_string(),
            );
            let (rate, bisection_iterations) = bisection(flows, &times)?;
            (
                rate,
                MAX_NEWTON_ITERATIONS + bisection_iterations,
                SolverKind::Bisection,
            )
        }
    };

    if rate <= Decimal::NEGATIVE_ONE {
        return Err(AnalyticsError::NegativeIrr);
    }

    let output = MoneyWeightedOutput {
        annualized_rate: rate,
        annualized_rate_percentage: (rate * dec!(100)).round_dp(PERCENTAGE_DP),
        iterations,
        solver,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Money-Weighted Return (XIRR)",
        &serde_json::json!({
            "flows": flows.len(),
            "day_count_convention": "actual/365",
            "initial_guess": "0.10",
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Solvers
// ---------------------------------------------------------------------------

fn npv_and_derivative(
    flows: &[CashFlowEvent],
    times: &[Decimal],
    rate: Decimal,
) -> (Decimal, Decimal) {
    let growth = Decimal::ONE + rate;
    let mut npv = Decimal::ZERO;
    let mut derivative = Decimal::ZERO;
    for (flow, t) in flows.iter().zip(times) {
        // Discount factors explode as the rate approaches -100%; saturate
        // instead of overflowing, since only the sign matters that far
        // from the root.
        let discount = growth.checked_powd(-*t).unwrap_or(Decimal::MAX);
        let term = flow
            .amount
            .checked_mul(discount)
            .unwrap_or_else(|| signed_max(flow.amount));
        npv = npv.checked_add(term).unwrap_or(term);
        let slope = term
            .checked_mul(-*t)
            .and_then(|v| v.checked_div(growth))
            .unwrap_or_else(|| signed_max(-term));
        derivative = derivative.checked_add(slope).unwrap_or(slope);
    }
    (npv, derivative)
}

fn signed_max(sign_of: Decimal) -> Decimal {
    if sign_of.is_sign_negative() {
        Decimal::MIN
    } else {
        Decimal::MAX
    }
}

fn newton_raphson(flows: &[CashFlowEvent], times: &[Decimal]) -> Option<(Decimal, u32)> {
    let mut rate = dec!(0.1);
    for iteration in 1..=MAX_NEWTON_ITERATIONS {
        let (npv, derivative) = npv_and_derivative(flows, times, rate);
        if npv.abs() < CONVERGENCE_THRESHOLD {
            return Some((rate, iteration));
        }
        if derivative.abs() < DERIVATIVE_THRESHOLD {
            return None;
        }
        rate = (rate - npv / derivative).clamp(RATE_FLOOR, RATE_CEILING);
    }
    None
}

fn bisection(flows: &[CashFlowEvent], times: &[Decimal]) -> AnalyticsResult<(Decimal, u32)> {
    let mut low = BISECTION_LOW;
    let mut high = BISECTION_HIGH;
    let (mut npv_low, _) = npv_and_derivative(flows, times, low);
    let (npv_high, _) = npv_and_derivative(flows, times, high);

    if (npv_low.is_sign_positive()) == (npv_high.is_sign_positive()) {
        return Err(AnalyticsError::ConvergenceFailure {
            function: "money_weighted_return".into(),
            iterations: MAX_NEWTON_ITERATIONS,
            last_delta: npv_low.abs().min(npv_high.abs()),
        });
    }

    let mut mid = low;
    for iteration in 1..=MAX_BISECTION_ITERATIONS {
        mid = (low + high) / dec!(2);
        let (npv_mid, _) = npv_and_derivative(flows, times, mid);
        if npv_mid.abs() < CONVERGENCE_THRESHOLD {
            return Ok((mid, iteration));
        }
        if (npv_mid.is_sign_positive()) == (npv_low.is_sign_positive()) {
            low = mid;
            npv_low = npv_mid;
        } else {
            high = mid;
        }
    }
    // Interval collapse without hitting the NPV tolerance still yields a
    // usable bracketed root.
    Ok((mid, MAX_BISECTION_ITERATIONS))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(flows: &[CashFlowEvent]) -> AnalyticsResult<()> {
    if flows.len() < 2 {
        return Err(AnalyticsError::InsufficientData(format!(
            "money-weighted return requires at least 2 flows, got {}",
            flows.len()
        )));
    }
    for pair in flows.windows(2) {
        if pair[1].date < pair[0].date {
            return Err(AnalyticsError::InvalidInput {
                field: "flows".into(),
                reason: format!(
                    "flows must be in chronological order ({} precedes {})",
                    pair[1].date, pair[0].date
                ),
            });
        }
    }
    if !flows.iter().any(|f| f.amount > Decimal::ZERO) {
        // Nothing ever came back out; no finite rate solves the equation.
        return Err(AnalyticsError::NegativeIrr);
    }
    if !flows.iter().any(|f| f.amount < Decimal::ZERO) {
        return Err(AnalyticsError::InvalidInput {
            field: "flows".into(),
            reason: "no capital was ever invested (all flows are non-negative)".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn flow(y: i32, m: u32, d: u32, amount: Decimal, kind: CashFlowKind) -> CashFlowEvent {
        CashFlowEvent {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            amount,
            kind,
        }
    }

    fn input(flows: Vec<CashFlowEvent>) -> MoneyWeightedInput {
        MoneyWeightedInput { flows }
    }

    // ------------------------------------------------------------------
    // 1. Reference scenario: staggered deposits, 17000 back
    // ------------------------------------------------------------------
    #[test]
    fn test_reference_scenario() {
        let result = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(-10000), CashFlowKind::Deposit),
            flow(2023, 6, 1, dec!(-5000), CashFlowKind::Deposit),
            flow(2023, 12, 31, dec!(17000), CashFlowKind::Valuation),
        ]))
        .unwrap();
        let out = &result.result;

        assert!(out.annualized_rate > dec!(0.10));
        assert!(out.annualized_rate < dec!(0.20));
        assert_eq!(out.solver, SolverKind::NewtonRaphson);
        assert!(out.iterations <= 100);
    }

    // ------------------------------------------------------------------
    // 2. Exact one-year round trip: 10000 -> 12000 is 20%
    // ------------------------------------------------------------------
    #[test]
    fn test_one_year_round_trip() {
        let result = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(-10000), CashFlowKind::Buy),
            flow(2024, 1, 1, dec!(12000), CashFlowKind::Valuation),
        ]))
        .unwrap();
        let out = &result.result;

        assert!((out.annualized_rate - dec!(0.2)).abs() < dec!(0.0001));
        assert_eq!(out.annualized_rate_percentage, dec!(20.00));
    }

    // ------------------------------------------------------------------
    // 3. A loss solves to a negative rate
    // ------------------------------------------------------------------
    #[test]
    fn test_negative_rate_on_loss() {
        let result = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(-10000), CashFlowKind::Buy),
            flow(2024, 1, 1, dec!(8000), CashFlowKind::Valuation),
        ]))
        .unwrap();
        let rate = result.result.annualized_rate;

        assert!(rate < Decimal::ZERO);
        assert!((rate - dec!(-0.2)).abs() < dec!(0.0001));
    }

    // ------------------------------------------------------------------
    // 4. Sign sanity: proceeds above invested capital imply r > 0
    // ------------------------------------------------------------------
    #[test]
    fn test_sign_sanity() {
        let gain = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(-5000), CashFlowKind::Deposit),
            flow(2023, 7, 1, dec!(-5000), CashFlowKind::Deposit),
            flow(2024, 6, 30, dec!(11000), CashFlowKind::Valuation),
        ]))
        .unwrap();
        assert!(gain.result.annualized_rate > Decimal::ZERO);

        let loss = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(-5000), CashFlowKind::Deposit),
            flow(2023, 7, 1, dec!(-5000), CashFlowKind::Deposit),
            flow(2024, 6, 30, dec!(9000), CashFlowKind::Valuation),
        ]))
        .unwrap();
        assert!(loss.result.annualized_rate < Decimal::ZERO);
    }

    // ------------------------------------------------------------------
    // 5. Interim withdrawals between deposits still solve cleanly
    // ------------------------------------------------------------------
    #[test]
    fn test_mixed_flows() {
        let result = calculate_money_weighted_return(&input(vec![
            flow(2022, 1, 1, dec!(-20000), CashFlowKind::Deposit),
            flow(2022, 9, 1, dec!(3000), CashFlowKind::Withdrawal),
            flow(2023, 3, 1, dec!(-4000), CashFlowKind::Deposit),
            flow(2023, 12, 31, dec!(24000), CashFlowKind::Valuation),
        ]))
        .unwrap();
        let rate = result.result.annualized_rate;
        // 27000 returned on 24000 invested over ~2 years.
        assert!(rate > Decimal::ZERO && rate < dec!(0.15));
    }

    // ------------------------------------------------------------------
    // 6. Fewer than two flows rejected
    // ------------------------------------------------------------------
    #[test]
    fn test_insufficient_flows() {
        let err = calculate_money_weighted_return(&input(vec![flow(
            2023,
            1,
            1,
            dec!(-10000),
            CashFlowKind::Buy,
        )]))
        .unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData(_)));
    }

    // ------------------------------------------------------------------
    // 7. All-negative flows: nothing returned
    // ------------------------------------------------------------------
    #[test]
    fn test_no_proceeds() {
        let err = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(-10000), CashFlowKind::Deposit),
            flow(2023, 6, 1, dec!(-5000), CashFlowKind::Deposit),
        ]))
        .unwrap_err();
        assert!(matches!(err, AnalyticsError::NegativeIrr));
    }

    // ------------------------------------------------------------------
    // 8. All-positive flows: nothing invested
    // ------------------------------------------------------------------
    #[test]
    fn test_no_investment() {
        let err = calculate_money_weighted_return(&input(vec![
            flow(2023, 1, 1, dec!(10000), CashFlowKind::Sell),
            flow(2023, 6, 1, dec!(5000), CashFlowKind::Withdrawal),
        ]))
        .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidInput { .. }));
    }

    // ------------------------------------------------------------------
    // 9. Out-of-order dates rejected
    // ------------------------------------------------------------------
    #[test]
    fn test_unsorted_flows() {
        let err = calculate_money_weighted_return(&input(vec![
            flow(2023, 6, 1, dec!(-10000), CashFlowKind::Buy),
            flow(2023, 1, 1, dec!(12000), CashFlowKind::Valuation),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InvalidInput { ref field, .. } if field == "flows"
        ));
    }

    // ------------------------------------------------------------------
    // 10. Performance budget: 500 flows under one second
    // ------------------------------------------------------------------
    #[test]
    fn test_performance_budget() {
        let base = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let mut flows: Vec<CashFlowEvent> = (0..499u64)
            .map(|i| CashFlowEvent {
                date: base + chrono::Days::new(i * 7),
                amount: dec!(-1000),
                kind: CashFlowKind::Deposit,
            })
            .collect();
        flows.push(CashFlowEvent {
            date: base + chrono::Days::new(499 * 7),
            amount: dec!(600000),
            kind: CashFlowKind::Valuation,
        });

        let start = std::time::Instant::now();
        let result = calculate_money_weighted_return(&input(flows)).unwrap();
        assert!(start.elapsed().as_millis() < 1000);
        assert!(result.result.annualized_rate > Decimal::ZERO);
    }
}
