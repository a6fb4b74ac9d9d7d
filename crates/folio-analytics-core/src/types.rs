use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Decimal places used for display-oriented `*_percentage` fields.
pub const PERCENTAGE_DP: u32 = 2;

/// Classifies a portfolio event for return calculations.
///
/// `Valuation` marks an observed portfolio value (including the terminal
/// value); every other kind is an external cash flow that breaks a
/// time-weighted sub-period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowKind {
    Buy,
    Sell,
    Deposit,
    Withdrawal,
    Valuation,
}

impl CashFlowKind {
    pub fn is_external_flow(&self) -> bool {
        !matches!(self, CashFlowKind::Valuation)
    }
}

/// A dated portfolio event.
///
/// Sign convention: negative amounts are capital moved into the portfolio
/// (buys, deposits); positive amounts are capital returned to the investor
/// (sells, withdrawals) or, for `Valuation` events, the observed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowEvent {
    pub date: NaiveDate,
    pub amount: Money,
    pub kind: CashFlowKind,
}

/// Sampling frequency of a return series, used for annualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl ReturnFrequency {
    /// Trading-calendar periods per year.
    pub fn periods_per_year(&self) -> u32 {
        match self {
            ReturnFrequency::Daily => 252,
            ReturnFrequency::Weekly => 52,
            ReturnFrequency::Monthly => 12,
            ReturnFrequency::Quarterly => 4,
            ReturnFrequency::Annual => 1,
        }
    }
}

/// Per-asset inputs to mean-variance optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStatistics {
    pub symbol: String,
    /// Annualized expected return; optional for minimum-variance-only calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<Rate>,
    /// Annualized standard deviation, must be >= 0.
    pub volatility: Rate,
}

/// A single asset weight in an optimized portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWeight {
    pub symbol: String,
    pub weight: Decimal,
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
