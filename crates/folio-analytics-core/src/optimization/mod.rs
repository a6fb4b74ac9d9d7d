pub mod mean_variance;
pub mod two_asset;
