pub mod holdings;
pub mod rates;
pub mod setup;
pub mod summary;
pub mod transactions;
pub mod ui;
