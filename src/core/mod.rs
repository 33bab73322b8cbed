pub mod analysis;
pub mod config;
pub mod error;
pub mod formatter;
pub mod ledger;
pub mod models;
pub mod pricing;
