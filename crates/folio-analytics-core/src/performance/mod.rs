pub mod mwr;
pub mod rolling;
pub mod twr;
