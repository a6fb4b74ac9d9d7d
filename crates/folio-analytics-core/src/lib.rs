pub mod error;
pub mod types;

#[cfg(feature = "performance")]
pub mod performance;

#[cfg(feature = "drawdown")]
pub mod drawdown;

#[cfg(feature = "optimization")]
pub mod optimization;

pub use error::AnalyticsError;
pub use types::*;

/// Standard result type for all analytics operations
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
