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

/// Input to the closed-form two-asset minimum-variance solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoAssetInput {
    pub asset_a: AssetStatistics,
    pub asset_b: AssetStatistics,
    /// Correlation between the two assets, in [-1, 1].
    pub correlation: Decimal,
}

/// Output of the two-asset minimum-variance solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoAssetOutput {
    pub weights: Vec<AssetWeight>,
    pub portfolio_volatility: Rate,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Minimum-variance weights for exactly two assets.
///
/// Analytical single-variable quadratic solution; no iteration. Boundary
/// correlations (+1, -1) and zero-volatility assets are handled as explicit
/// cases because the general formula is undefined or unstable there.
pub fn minimum_variance(
    input: &TwoAssetInput,
) -> AnalyticsResult<ComputationOutput<TwoAssetOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate(input)?;

    let vol_a = input.asset_a.volatility;
    let vol_b = input.asset_b.volatility;
    let rho = input.correlation;

    let (weight_a, volatility) = if vol_a.is_zero() {
        // A carries no risk; everything goes there.
        (Decimal::ONE, Decimal::ZERO)
    } else if vol_b.is_zero() {
        (Decimal::ZERO, Decimal::ZERO)
    } else if rho == Decimal::ONE {
        // No diversification benefit: hold the lower-volatility asset.
        if vol_a < vol_b {
            (Decimal::ONE, vol_a)
        } else if vol_b < vol_a {
            (Decimal::ZERO, vol_b)
        } else {
            (dec!(0.5), vol_a)
        }
    } else if rho == Decimal::NEGATIVE_ONE {
        // A riskless combination exists at w_a = sigma_b / (sigma_a + sigma_b).
        let weight_a = vol_b / (vol_a + vol_b);
        (weight_a, Decimal::ZERO)
    } else {
        let cov = vol_a * vol_b * rho;
        let numerator = vol_b * vol_b - cov;
        let denominator = vol_a * vol_a + vol_b * vol_b - dec!(2) * cov;
        if denominator.is_zero() {
            return Err(AnalyticsError::DivisionByZero {
                context: "two-asset minimum variance denominator".into(),
            });
        }
        let unconstrained = numerator / denominator;
        let weight_a = unconstrained.clamp(Decimal::ZERO, Decimal::ONE);
        if weight_a != unconstrained {
            warnings.push(format!(
                "Unconstrained weight {} for '{}' clamped to long-only range",
                unconstrained, input.asset_a.symbol
            ));
        }
        let weight_b = Decimal::ONE - weight_a;
        let variance = weight_a * weight_a * vol_a * vol_a
            + weight_b * weight_b * vol_b * vol_b
            + dec!(2) * weight_a * weight_b * cov;
        (weight_a, sqrt_decimal(variance))
    };

    let weight_b = Decimal::ONE - weight_a;
    let output = TwoAssetOutput {
        weights: vec![
            AssetWeight {
                symbol: input.asset_a.symbol.clone(),
                weight: weight_a,
            },
            AssetWeight {
                symbol: input.asset_b.symbol.clone(),
                weight: weight_b,
            },
        ],
        portfolio_volatility: volatility,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Two-Asset Closed-Form Minimum Variance",
        &serde_json::json!({
            "correlation": rho.to_string(),
            "volatility_a": vol_a.to_string(),
            "volatility_b": vol_b.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(input: &TwoAssetInput) -> AnalyticsResult<()> {
    if input.correlation < Decimal::NEGATIVE_ONE || input.correlation > Decimal::ONE {
        return Err(AnalyticsError::InvalidCorrelation(input.correlation));
    }
    for asset in [&input.asset_a, &input.asset_b] {
        if asset.volatility.is_sign_negative() && !asset.volatility.is_zero() {
            return Err(AnalyticsError::InvalidVolatility {
                symbol: asset.symbol.clone(),
                volatility: asset.volatility,
            });
        }
    }
    if input.asset_a.volatility.is_zero() && input.asset_b.volatility.is_zero() {
        return Err(AnalyticsError::DegenerateCase(
            "both assets have zero volatility; minimum-variance weight is undefined".into(),
        ));
    }
    Ok(())
}

fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn asset(symbol: &str, volatility: Decimal) -> AssetStatistics {
        AssetStatistics {
            symbol: symbol.into(),
            expected_return: None,
            volatility,
        }
    }

    fn input(vol_a: Decimal, vol_b: Decimal, correlation: Decimal) -> TwoAssetInput {
        TwoAssetInput {
            asset_a: asset("A", vol_a),
            asset_b: asset("B", vol_b),
            correlation,
        }
    }

    fn weight_of<'a>(out: &'a TwoAssetOutput, symbol: &str) -> Decimal {
        out.weights
            .iter()
            .find(|w| w.symbol == symbol)
            .map(|w| w.weight)
            .unwrap()
    }

    // ------------------------------------------------------------------
    // 1. Reference scenario: 0.20 / 0.05 vol at rho = 0.2
    // ------------------------------------------------------------------
    #[test]
    fn test_reference_scenario() {
        let result = minimum_variance(&input(dec!(0.20), dec!(0.05), dec!(0.2))).unwrap();
        let out = &result.result;

        assert!((weight_of(out, "A") - dec!(0.013)).abs() < dec!(0.001));
        assert!((weight_of(out, "B") - dec!(0.987)).abs() < dec!(0.001));
        assert!((out.portfolio_volatility - dec!(0.04994)).abs() < dec!(0.001));
    }

    // ------------------------------------------------------------------
    // 2. Weights sum to exactly one
    // ------------------------------------------------------------------
    #[test]
    fn test_weights_sum_exactly_one() {
        let result = minimum_variance(&input(dec!(0.18), dec!(0.09), dec!(0.45))).unwrap();
        let total: Decimal = result.result.weights.iter().map(|w| w.weight).sum();
        assert_eq!(total, Decimal::ONE);
    }

    // ------------------------------------------------------------------
    // 3. Perfect positive correlation picks the lower-volatility asset
    // ------------------------------------------------------------------
    #[test]
    fn test_perfect_positive_correlation() {
        let result = minimum_variance(&input(dec!(0.20), dec!(0.10), dec!(1))).unwrap();
        let out = &result.result;
        assert_eq!(weight_of(out, "B"), Decimal::ONE);
        assert_eq!(weight_of(out, "A"), Decimal::ZERO);
        assert_eq!(out.portfolio_volatility, dec!(0.10));
    }

    // ------------------------------------------------------------------
    // 4. Correlation boundary symmetry: swapping A and B flips the pick
    // ------------------------------------------------------------------
    #[test]
    fn test_boundary_symmetry() {
        let swapped = TwoAssetInput {
            asset_a: asset("A", dec!(0.10)),
            asset_b: asset("B", dec!(0.20)),
            correlation: dec!(1),
        };
        let result = minimum_variance(&swapped).unwrap();
        assert_eq!(weight_of(&result.result, "A"), Decimal::ONE);
    }

    // ------------------------------------------------------------------
    // 5. Perfect negative correlation gives a riskless combination
    // ------------------------------------------------------------------
    #[test]
    fn test_perfect_negative_correlation() {
        let result = minimum_variance(&input(dec!(0.20), dec!(0.10), dec!(-1))).unwrap();
        let out = &result.result;

        // w_a = sigma_b / (sigma_a + sigma_b) = 0.10 / 0.30
        let expected = dec!(0.10) / dec!(0.30);
        assert!((weight_of(out, "A") - expected).abs() < dec!(0.0000001));
        assert_eq!(out.portfolio_volatility, Decimal::ZERO);
    }

    // ------------------------------------------------------------------
    // 6. One zero-volatility asset takes the whole allocation
    // ------------------------------------------------------------------
    #[test]
    fn test_single_riskless_asset() {
        let result = minimum_variance(&input(dec!(0), dec!(0.15), dec!(0.3))).unwrap();
        let out = &result.result;
        assert_eq!(weight_of(out, "A"), Decimal::ONE);
        assert_eq!(out.portfolio_volatility, Decimal::ZERO);

        let result = minimum_variance(&input(dec!(0.15), dec!(0), dec!(0.3))).unwrap();
        assert_eq!(weight_of(&result.result, "B"), Decimal::ONE);
    }

    // ------------------------------------------------------------------
    // 7. Equal volatilities at rho = 1 split evenly
    // ------------------------------------------------------------------
    #[test]
    fn test_equal_vol_perfect_correlation() {
        let result = minimum_variance(&input(dec!(0.12), dec!(0.12), dec!(1))).unwrap();
        let out = &result.result;
        assert_eq!(weight_of(out, "A"), dec!(0.5));
        assert_eq!(out.portfolio_volatility, dec!(0.12));
    }

    // ------------------------------------------------------------------
    // 8. Correlation outside [-1, 1] is rejected
    // ------------------------------------------------------------------
    #[test]
    fn test_invalid_correlation() {
        for rho in [dec!(1.1), dec!(-1.1)] {
            let err = minimum_variance(&input(dec!(0.2), dec!(0.1), rho)).unwrap_err();
            assert!(matches!(err, AnalyticsError::InvalidCorrelation(_)));
        }
    }

    // ------------------------------------------------------------------
    // 9. Negative volatility is rejected
    // ------------------------------------------------------------------
    #[test]
    fn test_invalid_volatility() {
        let err = minimum_variance(&input(dec!(-0.2), dec!(0.1), dec!(0.5))).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidVolatility { .. }));
    }

    // ------------------------------------------------------------------
    // 10. Both volatilities zero is degenerate
    // ------------------------------------------------------------------
    #[test]
    fn test_degenerate_case() {
        let err = minimum_variance(&input(dec!(0), dec!(0), dec!(0.5))).unwrap_err();
        assert!(matches!(err, AnalyticsError::DegenerateCase(_)));
    }

    // ------------------------------------------------------------------
    // 11. Long-only: weights never negative
    // ------------------------------------------------------------------
    #[test]
    fn test_long_only() {
        // High correlation with a big vol gap drives the unconstrained
        // weight negative; it must be clamped.
        let result = minimum_variance(&input(dec!(0.30), dec!(0.05), dec!(0.9))).unwrap();
        for w in &result.result.weights {
            assert!(w.weight >= Decimal::ZERO);
        }
        assert!(!result.warnings.is_empty());
    }

    // ------------------------------------------------------------------
    // 12. Performance budget: closed form completes in microseconds
    // ------------------------------------------------------------------
    #[test]
    fn test_performance_budget() {
        let input = input(dec!(0.20), dec!(0.05), dec!(0.2));
        let start = std::time::Instant::now();
        for _ in 0..100 {
            minimum_variance(&input).unwrap();
        }
        // 100 calls well under 10ms leaves each call in the microsecond range.
        assert!(start.elapsed().as_millis() < 10);
    }
}
