pub mod client;
pub mod snapshot;
pub mod sync;

pub use client::LedgerClient;
pub use sync::{LedgerSync, SyncMode, SyncOutcome};
