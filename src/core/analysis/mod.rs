pub mod aggregate;
pub mod economics;
pub mod pipeline;
pub mod profiler;
pub mod recommend;

pub use pipeline::{run, Report, SyncSummary};
