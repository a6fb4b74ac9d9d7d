use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AnalyticsError;
use crate::optimization::two_asset::{self, TwoAssetInput};
use crate::types::*;
use crate::AnalyticsResult;

const SYMMETRY_TOLERANCE: Decimal = dec!(0.0000001);
const WEIGHT_TOLERANCE: Decimal = dec!(0.0000001);
const EXCESS_RETURN_TOLERANCE: Decimal = dec!(0.0000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input to N-asset mean-variance optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanVarianceInput {
    pub assets: Vec<AssetStatistics>,
    /// N x N correlation matrix: symmetric, unit diagonal, entries in [-1, 1].
    pub correlation_matrix: Vec<Vec<Decimal>>,
}

/// Output of any optimizer call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutput {
    /// Long-only weights summing to exactly 1.
    pub weights: Vec<AssetWeight>,
    pub portfolio_volatility: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpe_ratio: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Two-asset fast path: delegates to the closed-form solver, bypassing
/// matrix inversion entirely.
pub fn optimize_two_asset(
    input: &MeanVarianceInput,
) -> AnalyticsResult<ComputationOutput<OptimizationOutput>> {
    let start = Instant::now();
    let n = validate_inputs(input)?;
    if n != 2 {
        return Err(AnalyticsError::InvalidInput {
            field: "assets".into(),
            reason: format!("two-asset path requires exactly 2 assets, got {n}"),
        });
    }

    let pair = TwoAssetInput {
        asset_a: input.assets[0].clone(),
        asset_b: input.assets[1].clone(),
        correlation: input.correlation_matrix[0][1],
    };
    let inner = two_asset::minimum_variance(&pair)?;
    let weights: Vec<Decimal> = inner.result.weights.iter().map(|w| w.weight).collect();
    let expected_return = expected_return_if_known(input, &weights);

    let output = OptimizationOutput {
        weights: inner.result.weights.clone(),
        portfolio_volatility: inner.result.portfolio_volatility,
        expected_return,
        sharpe_ratio: None,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Two-Asset Closed-Form Minimum Variance",
        &serde_json::json!({ "n_assets": 2 }),
        inner.warnings,
        elapsed,
        output,
    ))
}

/// Global minimum-variance portfolio: w* = Sigma^-1 * 1 / (1' * Sigma^-1 * 1),
/// with an active-set reduction when the unconstrained solution shorts an
/// asset (long-only invariant).
pub fn find_minimum_variance(
    input: &MeanVarianceInput,
) -> AnalyticsResult<ComputationOutput<OptimizationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = validate_inputs(input)?;
    let sigma = covariance_matrix(input);

    let weights = long_only_min_variance(&sigma, &mut warnings)?;
    let volatility = portfolio_std(&weights, &sigma);
    let expected_return = expected_return_if_known(input, &weights);

    let output = OptimizationOutput {
        weights: named_weights(input, &weights),
        portfolio_volatility: volatility,
        expected_return,
        sharpe_ratio: None,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Global Minimum-Variance Portfolio",
        &serde_json::json!({ "n_assets": n }),
        warnings,
        elapsed,
        output,
    ))
}

/// Tangency (maximum Sharpe) portfolio: w* proportional to
/// Sigma^-1 * (mu - rf * 1), normalized to sum to 1. When every excess
/// return is zero the objective degenerates and the minimum-variance
/// portfolio is returned instead (documented behavior, not an error).
pub fn maximize_sharpe(
    input: &MeanVarianceInput,
    risk_free_rate: Rate,
) -> AnalyticsResult<ComputationOutput<OptimizationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = validate_inputs(input)?;
    let mu = required_expected_returns(input)?;
    let sigma = covariance_matrix(input);

    let weights = long_only_tangency(&sigma, &mu, risk_free_rate, &mut warnings)?;
    let volatility = portfolio_std(&weights, &sigma);
    let portfolio_return = vec_dot(&weights, &mu);
    let sharpe_ratio = if volatility.is_zero() {
        Decimal::ZERO
    } else {
        (portfolio_return - risk_free_rate) / volatility
    };

    let output = OptimizationOutput {
        weights: named_weights(input, &weights),
        portfolio_volatility: volatility,
        expected_return: Some(portfolio_return),
        sharpe_ratio: Some(sharpe_ratio),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Tangency (Maximum Sharpe) Portfolio",
        &serde_json::json!({
            "n_assets": n,
            "risk_free_rate": risk_free_rate.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Minimum-variance portfolio with expected return pinned to `target_return`,
/// solved via the standard two-constraint Lagrangian closed form. Targets
/// outside the convex hull of single-asset returns are unattainable without
/// leverage or shorting.
pub fn optimize_target_return(
    input: &MeanVarianceInput,
    target_return: Rate,
) -> AnalyticsResult<ComputationOutput<OptimizationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = validate_inputs(input)?;
    let mu = required_expected_returns(input)?;
    let sigma = covariance_matrix(input);

    let weights = long_only_target_return(&sigma, &mu, target_return, &mut warnings)?;
    let volatility = portfolio_std(&weights, &sigma);
    let portfolio_return = vec_dot(&weights, &mu);

    let output = OptimizationOutput {
        weights: named_weights(input, &weights),
        portfolio_volatility: volatility,
        expected_return: Some(portfolio_return),
        sharpe_ratio: None,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Target-Return Efficient Portfolio",
        &serde_json::json!({
            "n_assets": n,
            "target_return": target_return.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_inputs(input: &MeanVarianceInput) -> AnalyticsResult<usize> {
    let n = input.assets.len();
    if n == 0 {
        return Err(AnalyticsError::NoAssets);
    }
    if n < 2 {
        return Err(AnalyticsError::InsufficientAssets {
            required: 2,
            actual: n,
        });
    }

    let matrix = &input.correlation_matrix;
    if matrix.len() != n {
        return Err(AnalyticsError::MismatchedMatrixSize {
            expected: n,
            actual: matrix.len(),
        });
    }
    for row in matrix {
        if row.len() != n {
            return Err(AnalyticsError::MismatchedMatrixSize {
                expected: n,
                actual: row.len(),
            });
        }
    }

    for (i, row) in matrix.iter().enumerate() {
        if row[i] != Decimal::ONE {
            return Err(AnalyticsError::InvalidCorrelationMatrix(format!(
                "diagonal entry [{i}][{i}] is {}, expected exactly 1",
                row[i]
            )));
        }
        for (j, entry) in row.iter().enumerate() {
            if *entry < Decimal::NEGATIVE_ONE || *entry > Decimal::ONE {
                return Err(AnalyticsError::InvalidCorrelationMatrix(format!(
                    "entry [{i}][{j}] = {entry} outside [-1, 1]"
                )));
            }
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if (matrix[i][j] - matrix[j][i]).abs() > SYMMETRY_TOLERANCE {
                return Err(AnalyticsError::InvalidCorrelationMatrix(format!(
                    "not symmetric: [{i}][{j}]={} != [{j}][{i}]={}",
                    matrix[i][j], matrix[j][i]
                )));
            }
        }
    }

    for asset in &input.assets {
        if asset.volatility < Decimal::ZERO {
            return Err(AnalyticsError::InvalidVolatility {
                symbol: asset.symbol.clone(),
                volatility: asset.volatility,
            });
        }
    }

    Ok(n)
}

fn required_expected_returns(input: &MeanVarianceInput) -> AnalyticsResult<Vec<Decimal>> {
    input
        .assets
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            asset
                .expected_return
                .ok_or_else(|| AnalyticsError::InvalidInput {
                    field: format!("assets[{i}].expected_return"),
                    reason: "expected return required for this optimization target".into(),
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Core solvers
// ---------------------------------------------------------------------------

/// Unconstrained global minimum variance on the given covariance matrix.
fn solve_min_variance(sigma: &[Vec<Decimal>]) -> AnalyticsResult<Vec<Decimal>> {
    let n = sigma.len();
    let sigma_inv = mat_inverse(sigma)?;
    let ones = vec![Decimal::ONE; n];
    let sigma_inv_ones = mat_vec_multiply(&sigma_inv, &ones);
    let denom: Decimal = sigma_inv_ones.iter().sum();
    if denom.is_zero() {
        return Err(AnalyticsError::DivisionByZero {
            context: "minimum variance: 1' * Sigma^-1 * 1 is zero".into(),
        });
    }
    Ok(sigma_inv_ones.iter().map(|v| *v / denom).collect())
}

/// Minimum variance with the long-only constraint. Negative-weight assets
/// are dropped from the active set and the reduced problem re-solved until
/// every surviving weight is non-negative.
fn long_only_min_variance(
    sigma: &[Vec<Decimal>],
    warnings: &mut Vec<String>,
) -> AnalyticsResult<Vec<Decimal>> {
    let n = sigma.len();
    let mut active: Vec<usize> = (0..n).collect();

    loop {
        if active.len() == 1 {
            let mut weights = vec![Decimal::ZERO; n];
            weights[active[0]] = Decimal::ONE;
            return Ok(weights);
        }

        let reduced = submatrix(sigma, &active);
        let solution = solve_min_variance(&reduced)?;

        if solution.iter().all(|w| *w >= -WEIGHT_TOLERANCE) {
            return Ok(expand_solution(&solution, &active, n));
        }

        warnings.push(
            "Unconstrained minimum-variance solution shorts an asset; re-solving long-only"
                .to_string(),
        );
        let next: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(k, _)| solution[*k] >= -WEIGHT_TOLERANCE)
            .map(|(_, &i)| i)
            .collect();
        if next.is_empty() || next.len() == active.len() {
            return Err(AnalyticsError::DegenerateCase(
                "active-set reduction failed to reach a long-only solution".into(),
            ));
        }
        active = next;
    }
}

/// Tangency portfolio with the long-only constraint, falling back to the
/// minimum-variance portfolio when the excess-return vector degenerates.
fn long_only_tangency(
    sigma: &[Vec<Decimal>],
    mu: &[Decimal],
    risk_free_rate: Rate,
    warnings: &mut Vec<String>,
) -> AnalyticsResult<Vec<Decimal>> {
    let n = sigma.len();
    let mut active: Vec<usize> = (0..n).collect();

    loop {
        if active.len() == 1 {
            let mut weights = vec![Decimal::ZERO; n];
            weights[active[0]] = Decimal::ONE;
            return Ok(weights);
        }

        let reduced_sigma = submatrix(sigma, &active);
        let reduced_excess: Vec<Decimal> =
            active.iter().map(|&i| mu[i] - risk_free_rate).collect();

        let sigma_inv = mat_inverse(&reduced_sigma)?;
        let sigma_inv_excess = mat_vec_multiply(&sigma_inv, &reduced_excess);
        let denom: Decimal = sigma_inv_excess.iter().sum();

        if denom.abs() < EXCESS_RETURN_TOLERANCE {
            warnings.push(
                "All excess returns are zero; falling back to the minimum-variance portfolio"
                    .to_string(),
            );
            return long_only_min_variance(sigma, warnings);
        }

        let solution: Vec<Decimal> = sigma_inv_excess.iter().map(|v| *v / denom).collect();

        if solution.iter().all(|w| *w >= -WEIGHT_TOLERANCE) {
            return Ok(expand_solution(&solution, &active, n));
        }

        warnings.push(
            "Unconstrained tangency solution shorts an asset; re-solving long-only".to_string(),
        );
        let next: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(k, _)| solution[*k] >= -WEIGHT_TOLERANCE)
            .map(|(_, &i)| i)
            .collect();
        if next.is_empty() || next.len() == active.len() {
            return Err(AnalyticsError::DegenerateCase(
                "active-set reduction failed to reach a long-only tangency portfolio".into(),
            ));
        }
        active = next;
    }
}

/// Target-return portfolio via the two-constraint Lagrangian closed form:
/// with A = 1'S^-1*1, B = 1'S^-1*mu, C = mu'S^-1*mu and D = AC - B^2, the
/// solution is w = g + h * target where g = (C*S^-1*1 - B*S^-1*mu)/D and
/// h = (A*S^-1*mu - B*S^-1*1)/D.
fn long_only_target_return(
    sigma: &[Vec<Decimal>],
    mu: &[Decimal],
    target: Rate,
    warnings: &mut Vec<String>,
) -> AnalyticsResult<Vec<Decimal>> {
    let n = sigma.len();
    check_attainable(mu, target)?;

    let mut active: Vec<usize> = (0..n).collect();

    loop {
        if active.len() == 1 {
            let only = active[0];
            if (mu[only] - target).abs() > WEIGHT_TOLERANCE {
                return Err(AnalyticsError::UnattainableReturn {
                    target,
                    maximum: mu[only],
                });
            }
            let mut weights = vec![Decimal::ZERO; n];
            weights[only] = Decimal::ONE;
            return Ok(weights);
        }

        let reduced_sigma = submatrix(sigma, &active);
        let reduced_mu: Vec<Decimal> = active.iter().map(|&i| mu[i]).collect();

        let solution = solve_target_return(&reduced_sigma, &reduced_mu, target)?;

        if solution.iter().all(|w| *w >= -WEIGHT_TOLERANCE) {
            return Ok(expand_solution(&solution, &active, n));
        }

        warnings.push(
            "Unconstrained target-return solution shorts an asset; re-solving long-only"
                .to_string(),
        );
        let next: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(k, _)| solution[*k] >= -WEIGHT_TOLERANCE)
            .map(|(_, &i)| i)
            .collect();
        if next.is_empty() || next.len() == active.len() {
            return Err(AnalyticsError::DegenerateCase(
                "active-set reduction failed to reach a long-only target-return portfolio"
                    .into(),
            ));
        }
        // The reduced asset set must still span the target.
        let reduced: Vec<Decimal> = next.iter().map(|&i| mu[i]).collect();
        check_attainable(&reduced, target)?;
        active = next;
    }
}

fn solve_target_return(
    sigma: &[Vec<Decimal>],
    mu: &[Decimal],
    target: Rate,
) -> AnalyticsResult<Vec<Decimal>> {
    let n = sigma.len();
    let spread = max_decimal(mu) - min_decimal(mu);
    if spread.abs() < WEIGHT_TOLERANCE {
        // All expected returns equal; the return constraint is inert and the
        // minimum-variance portfolio is the unique efficient solution.
        return solve_min_variance(sigma);
    }

    let sigma_inv = mat_inverse(sigma)?;
    let ones = vec![Decimal::ONE; n];
    let inv_ones = mat_vec_multiply(&sigma_inv, &ones);
    let inv_mu = mat_vec_multiply(&sigma_inv, mu);

    let a: Decimal = inv_ones.iter().sum();
    let b: Decimal = inv_mu.iter().sum();
    let c = vec_dot(mu, &inv_mu);
    let d = a * c - b * b;

    if d.abs() < EXCESS_RETURN_TOLERANCE {
        return Err(AnalyticsError::DegenerateCase(
            "target-return Lagrangian system is singular".into(),
        ));
    }

    Ok((0..n)
        .map(|i| {
            let g = (c * inv_ones[i] - b * inv_mu[i]) / d;
            let h = (a * inv_mu[i] - b * inv_ones[i]) / d;
            g + h * target
        })
        .collect())
}

fn check_attainable(mu: &[Decimal], target: Rate) -> AnalyticsResult<()> {
    let maximum = max_decimal(mu);
    let minimum = min_decimal(mu);
    if target > maximum || target < minimum {
        return Err(AnalyticsError::UnattainableReturn { target, maximum });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Weight and matrix helpers
// ---------------------------------------------------------------------------

/// Covariance from volatilities and correlations: Sigma_ij = s_i * s_j * rho_ij.
fn covariance_matrix(input: &MeanVarianceInput) -> Vec<Vec<Decimal>> {
    let n = input.assets.len();
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    input.assets[i].volatility
                        * input.assets[j].volatility
                        * input.correlation_matrix[i][j]
                })
                .collect()
        })
        .collect()
}

/// Map an active-set solution back to full length, clamp rounding residue,
/// and force the sum to exactly one.
fn expand_solution(solution: &[Decimal], active: &[usize], n: usize) -> Vec<Decimal> {
    let mut weights = vec![Decimal::ZERO; n];
    for (k, &i) in active.iter().enumerate() {
        weights[i] = solution[k].max(Decimal::ZERO);
    }
    normalize_exact(&mut weights);
    weights
}

/// Normalize weights and assign the leftover rounding residue to the largest
/// weight so the sum is exactly Decimal::ONE.
fn normalize_exact(weights: &mut [Decimal]) {
    let total: Decimal = weights.iter().sum();
    if total.is_zero() {
        return;
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
    let sum: Decimal = weights.iter().sum();
    let residual = Decimal::ONE - sum;
    if !residual.is_zero() {
        if let Some((idx, _)) = weights
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.cmp(b))
        {
            weights[idx] += residual;
        }
    }
}

fn named_weights(input: &MeanVarianceInput, weights: &[Decimal]) -> Vec<AssetWeight> {
    input
        .assets
        .iter()
        .zip(weights.iter())
        .map(|(asset, weight)| AssetWeight {
            symbol: asset.symbol.clone(),
            weight: *weight,
        })
        .collect()
}

fn expected_return_if_known(input: &MeanVarianceInput, weights: &[Decimal]) -> Option<Rate> {
    let mu: Option<Vec<Decimal>> = input.assets.iter().map(|a| a.expected_return).collect();
    mu.map(|mu| vec_dot(weights, &mu))
}

/// Portfolio standard deviation: sqrt(w' * Sigma * w).
fn portfolio_std(weights: &[Decimal], sigma: &[Vec<Decimal>]) -> Decimal {
    let sigma_w = mat_vec_multiply(sigma, weights);
    let variance = vec_dot(weights, &sigma_w);
    sqrt_decimal(variance)
}

fn submatrix(sigma: &[Vec<Decimal>], active: &[usize]) -> Vec<Vec<Decimal>> {
    active
        .iter()
        .map(|&i| active.iter().map(|&j| sigma[i][j]).collect())
        .collect()
}

fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

fn max_decimal(values: &[Decimal]) -> Decimal {
    values
        .iter()
        .copied()
        .fold(Decimal::MIN, |acc, v| if v > acc { v } else { acc })
}

fn min_decimal(values: &[Decimal]) -> Decimal {
    values
        .iter()
        .copied()
        .fold(Decimal::MAX, |acc, v| if v < acc { v } else { acc })
}

/// Matrix inverse via Gauss-Jordan with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn mat_inverse(mat: &[Vec<Decimal>]) -> AnalyticsResult<Vec<Vec<Decimal>>> {
    let n = mat.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut aug: Vec<Vec<Decimal>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(&mat[i]);
        for j in 0..n {
            row.push(if i == j { Decimal::ONE } else { Decimal::ZERO });
        }
        aug.push(row);
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < dec!(0.0000000001) {
            return Err(AnalyticsError::DegenerateCase(
                "covariance matrix is singular and cannot be inverted".into(),
            ));
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }

    let inv: Vec<Vec<Decimal>> = aug.iter().map(|row| row[n..].to_vec()).collect();
    Ok(inv)
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
