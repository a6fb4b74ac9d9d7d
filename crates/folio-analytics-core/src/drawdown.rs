use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AnalyticsError;
use crate::types::*;
use crate::AnalyticsResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An ordered series of positive portfolio values (e.g. daily or monthly NAV).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownInput {
    pub values: Vec<Money>,
}

/// Output of peak-to-trough drawdown analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownOutput {
    /// Worst peak-to-trough decline as a fraction in [0, 1].
    pub max_drawdown: Decimal,
    /// Same value x100, rounded for display.
    pub max_drawdown_percentage: Decimal,
    /// Decline from the running peak still outstanding at the final sample.
    pub current_drawdown: Decimal,
    /// Peak value of the worst episode specifically.
    pub peak_value: Money,
    /// Trough value of the worst episode specifically.
    pub trough_value: Money,
    /// Samples from the worst episode's trough back to the first sample at
    /// or above its peak; None if the series never recovers.
    pub recovery_periods: Option<u32>,
    /// Count of all samples strictly below the running peak.
    pub underwater_periods: u32,
}

/// A single drawdown episode for history enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownEpisode {
    pub peak_index: usize,
    pub trough_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_index: Option<usize>,
    pub peak_value: Money,
    pub trough_value: Money,
    pub drawdown: Decimal,
    pub drawdown_percentage: Decimal,
    /// Peak-to-trough distance in samples.
    pub duration_periods: u32,
    /// Trough-to-recovery distance in samples; None if never recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_periods: Option<u32>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Peak-to-trough analysis over a value series.
///
/// A single forward pass tracks the running peak, the worst episode, and the
/// underwater sample count; a bounded second scan from the worst trough
/// locates the recovery point. Linear in the series length.
pub fn calculate_drawdown(
    input: &DrawdownInput,
) -> AnalyticsResult<ComputationOutput<DrawdownOutput>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    validate(&input.values)?;
    let values = &input.values;

    let mut peak = values[0];
    let mut peak_index: usize = 0;
    let mut max_drawdown = Decimal::ZERO;
    let mut worst_peak_index: usize = 0;
    let mut worst_trough_index: usize = 0;
    let mut worst_peak_value = values[0];
    let mut worst_trough_value = values[0];
    let mut underwater_periods: u32 = 0;

    for (i, value) in values.iter().enumerate() {
        if *value > peak {
            peak = *value;
            peak_index = i;
        }
        if *value < peak {
            underwater_periods += 1;
        }
        let drawdown = (peak - value) / peak;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
            worst_peak_index = peak_index;
            worst_trough_index = i;
            worst_peak_value = peak;
            worst_trough_value = *value;
        }
    }

    let last = values[values.len() - 1];
    let current_drawdown = (peak - last) / peak;

    let recovery_periods = if max_drawdown.is_zero() {
        Some(0)
    } else {
        values[worst_trough_index + 1..]
            .iter()
            .position(|v| *v >= worst_peak_value)
            .map(|offset| (offset + 1) as u32)
    };

    let output = DrawdownOutput {
        max_drawdown,
        max_drawdown_percentage: (max_drawdown * dec!(100)).round_dp(PERCENTAGE_DP),
        current_drawdown,
        peak_value: worst_peak_value,
        trough_value: worst_trough_value,
        recovery_periods,
        underwater_periods,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Drawdown Analysis",
        &serde_json::json!({ "observations": values.len() }),
        warnings,
        elapsed,
        output,
    ))
}

/// Every distinct drawdown episode whose magnitude exceeds `threshold`
/// (fraction). An episode is a maximal contiguous underwater run between two
/// samples at or above the prior peak.
pub fn calculate_drawdown_history(
    input: &DrawdownInput,
    threshold: Decimal,
) -> AnalyticsResult<ComputationOutput<Vec<DrawdownEpisode>>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    validate(&input.values)?;
    if threshold < Decimal::ZERO {
        return Err(AnalyticsError::InvalidInput {
            field: "threshold".into(),
            reason: "threshold must be non-negative".into(),
        });
    }
    let values = &input.values;

    let mut episodes: Vec<DrawdownEpisode> = Vec::new();
    let mut peak = values[0];
    let mut peak_index: usize = 0;
    let mut underwater = false;
    let mut trough = values[0];
    let mut trough_index: usize = 0;

    for (i, value) in values.iter().enumerate().skip(1) {
        if underwater {
            if *value < trough {
                trough = *value;
                trough_index = i;
            }
            if *value >= peak {
                episodes.push(build_episode(
                    peak_index,
                    trough_index,
                    Some(i),
                    peak,
                    trough,
                ));
                underwater = false;
                peak = *value;
                peak_index = i;
            }
        } else if *value >= peak {
            peak = *value;
            peak_index = i;
        } else {
            underwater = true;
            trough = *value;
            trough_index = i;
        }
    }

    if underwater {
        episodes.push(build_episode(peak_index, trough_index, None, peak, trough));
    }

    episodes.retain(|e| e.drawdown > threshold);

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Drawdown Episode History",
        &serde_json::json!({
            "observations": values.len(),
            "threshold": threshold.to_string(),
        }),
        warnings,
        elapsed,
        episodes,
    ))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn build_episode(
    peak_index: usize,
    trough_index: usize,
    recovery_index: Option<usize>,
    peak_value: Money,
    trough_value: Money,
) -> DrawdownEpisode {
    let drawdown = (peak_value - trough_value) / peak_value;
    DrawdownEpisode {
        peak_index,
        trough_index,
        recovery_index,
        peak_value,
        trough_value,
        drawdown,
        drawdown_percentage: (drawdown * dec!(100)).round_dp(PERCENTAGE_DP),
        duration_periods: (trough_index - peak_index) as u32,
        recovery_periods: recovery_index.map(|r| (r - trough_index) as u32),
    }
}

fn validate(values: &[Decimal]) -> AnalyticsResult<()> {
    if values.len() < 2 {
        return Err(AnalyticsError::InsufficientData(format!(
            "drawdown analysis requires at least 2 values, got {}",
            values.len()
        )));
    }
    for (index, value) in values.iter().enumerate() {
        if *value <= Decimal::ZERO {
            return Err(AnalyticsError::NonPositiveValue {
                index,
                value: *value,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
