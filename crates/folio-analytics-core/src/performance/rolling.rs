use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AnalyticsError;
use crate::types::*;
use crate::AnalyticsResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A periodic return series with its sampling frequency and window length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingReturnsInput {
    /// Per-period returns as fractions (0.01 = 1%).
    pub returns: Vec<Rate>,
    pub window_size: usize,
    pub frequency: ReturnFrequency,
}

/// One rolling window over the return series (indices inclusive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub cumulative_return: Rate,
    pub annualized_return: Rate,
}

/// Summary statistics across all rolling windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingAnalysis {
    pub windows: Vec<RollingWindow>,
    pub best_window: RollingWindow,
    pub worst_window: RollingWindow,
    /// Mean of the annualized window returns.
    pub average_return: Rate,
    /// Sample standard deviation of the annualized window returns.
    pub volatility: Rate,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Every contiguous window of `window_size` periods, compounded and
/// annualized at the series frequency. Produces N - window + 1 windows.
pub fn calculate_rolling_returns(
    input: &RollingReturnsInput,
) -> AnalyticsResult<ComputationOutput<Vec<RollingWindow>>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    validate(input)?;
    let windows = build_windows(input);

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Rolling Returns",
        &rolling_assumptions(input),
        warnings,
        elapsed,
        windows,
    ))
}

/// Rolling windows plus best/worst/average/dispersion summary, ranked by
/// annualized return.
pub fn analyze_rolling_returns(
    input: &RollingReturnsInput,
) -> AnalyticsResult<ComputationOutput<RollingAnalysis>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    validate(input)?;
    let windows = build_windows(input);

    // Validation guarantees at least one window.
    let mut best = &windows[0];
    let mut worst = &windows[0];
    let mut sum = Decimal::ZERO;
    for window in &windows {
        if window.annualized_return > best.annualized_return {
            best = window;
        }
        if window.annualized_return < worst.annualized_return {
            worst = window;
        }
        sum += window.annualized_return;
    }
    let count = Decimal::from(windows.len());
    let average_return = sum / count;

    let volatility = if windows.len() < 2 {
        Decimal::ZERO
    } else {
        let sum_sq: Decimal = windows
            .iter()
            .map(|w| {
                let d = w.annualized_return - average_return;
                d * d
            })
            .sum();
        let variance = sum_sq / (count - Decimal::ONE);
        variance.sqrt().unwrap_or(Decimal::ZERO)
    };

    let analysis = RollingAnalysis {
        best_window: best.clone(),
        worst_window: worst.clone(),
        average_return,
        volatility,
        windows,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Rolling Return Analysis",
        &rolling_assumptions(input),
        warnings,
        elapsed,
        analysis,
    ))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn build_windows(input: &RollingReturnsInput) -> Vec<RollingWindow> {
    let window = input.window_size;
    let periods_per_year = Decimal::from(input.frequency.periods_per_year());
    let exponent = periods_per_year / Decimal::from(window as u64);

    (0..=input.returns.len() - window)
        .map(|start_index| {
            let growth: Decimal = input.returns[start_index..start_index + window]
                .iter()
                .map(|r| Decimal::ONE + r)
                .product();
            let cumulative_return = growth - Decimal::ONE;
            let annualized_return = if growth <= Decimal::ZERO {
                // Total loss cannot compound; cap at -100%.
                Decimal::NEGATIVE_ONE
            } else {
                growth.powd(exponent) - Decimal::ONE
            };
            RollingWindow {
                start_index,
                end_index: start_index + window - 1,
                cumulative_return,
                annualized_return,
            }
        })
        .collect()
}

fn rolling_assumptions(input: &RollingReturnsInput) -> serde_json::Value {
    serde_json::json!({
        "observations": input.returns.len(),
        "window_size": input.window_size,
        "periods_per_year": input.frequency.periods_per_year(),
    })
}

fn validate(input: &RollingReturnsInput) -> AnalyticsResult<()> {
    if input.window_size == 0 {
        return Err(AnalyticsError::InvalidInput {
            field: "window_size".into(),
            reason: "window size must be at least 1".into(),
        });
    }
    if input.returns.len() < input.window_size {
        return Err(AnalyticsError::InsufficientData(format!(
            "rolling window of {} periods needs at least {} returns, got {}",
            input.window_size,
            input.window_size,
            input.returns.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
