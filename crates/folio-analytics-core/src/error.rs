use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No assets supplied")]
    NoAssets,

    #[error("Insufficient assets: need at least {required}, got {actual}")]
    InsufficientAssets { required: usize, actual: usize },

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Correlation {0} outside [-1, 1]")]
    InvalidCorrelation(Decimal),

    #[error("Invalid correlation matrix: {0}")]
    InvalidCorrelationMatrix(String),

    #[error("Correlation matrix is {actual}x{actual} but {expected} assets were supplied")]
    MismatchedMatrixSize { expected: usize, actual: usize },

    #[error("Volatility {volatility} for '{symbol}' is negative")]
    InvalidVolatility { symbol: String, volatility: Decimal },

    #[error("Non-positive value {value} at index {index}")]
    NonPositiveValue { index: usize, value: Decimal },

    #[error("Degenerate case: {0}")]
    DegenerateCase(String),

    #[error("Sub-period starting {date} has a zero start value")]
    ZeroStartValue { date: NaiveDate },

    #[error("No sensible finite rate solves the IRR equation")]
    NegativeIrr,

    #[error("Target return {target} is unattainable (maximum achievable: {maximum})")]
    UnattainableReturn { target: Decimal, maximum: Decimal },

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },
}
