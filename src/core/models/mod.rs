pub mod cache;
pub mod cost;
pub mod ledger;
pub mod request;
