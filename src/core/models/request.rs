use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which part of a logical request a ledger row bills for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    CacheRead,
    CacheWrite,
    RegularInput,
    Output,
}

/// Billed amounts per charge kind, summed across a request's rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeCosts {
    pub cache_read: f64,
    pub cache_write: f64,
    pub regular_input: f64,
    pub output: f64,
}

impl ChargeCosts {
    pub fn add(&mut self, kind: ChargeKind, amount: f64) {
        match kind {
            ChargeKind::CacheRead => self.cache_read += amount,
            ChargeKind::CacheWrite => self.cache_write += amount,
            ChargeKind::RegularInput => self.regular_input += amount,
            ChargeKind::Output => self.output += amount,
        }
    }

    pub fn total(&self) -> f64 {
        self.cache_read + self.cache_write + self.regular_input + self.output
    }
}

/// One logical inference request rebuilt from its ledger rows.
///
/// Token counts are the maximum seen across rows (each row re-reports the
/// request's cumulative counts); costs are sums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRequest {
    pub request_id: String,
    /// True when the rows carried no request id and one was synthesized.
    pub synthetic_id: bool,
    pub model: String,
    pub currency: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub cache_write_tokens: u64,
    pub costs: ChargeCosts,
    pub rows: usize,
    /// Any row billed text inference or carried token details.
    pub inference: bool,
    /// Earliest row timestamp.
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
}

impl AggregatedRequest {
    pub fn total_cost(&self) -> f64 {
        self.costs.total()
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_cache_hit(&self) -> bool {
        self.cached_tokens > 0 || self.costs.cache_read > 0.0
    }
}
