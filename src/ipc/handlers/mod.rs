pub mod core;
pub mod datasets;
pub mod export;
pub mod reports;
