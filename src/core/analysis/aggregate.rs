use std::collections::HashMap;

use crate::core::models::ledger::LedgerRecord;
use crate::core::models::request::{AggregatedRequest, ChargeCosts, ChargeKind};
use crate::core::pricing::catalog::model_id_from_sku;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

const NON_INFERENCE_MARKERS: &[&str] = &[
    "video", "image", "veo", "sora", "kling", "flux", "sd35", "upscale", "embed",
];
const INFERENCE_MARKERS: &[&str] = &[
    "llm", "mtoken", "input", "output", "prompt", "completion", "cache",
];

/// Requests rebuilt from ledger rows, plus rows that could not be placed.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub requests: Vec<AggregatedRequest>,
    /// Rows dropped for an unreadable timestamp.
    pub skipped: usize,
}

/// Which charge a SKU bills for. Unrecognized SKUs count as regular input.
pub fn classify_sku(sku: &str) -> ChargeKind {
    let sku = sku.to_ascii_lowercase();
    let cache = sku.contains("cache");
    if cache && (sku.contains("write") || sku.contains("creation")) {
        ChargeKind::CacheWrite
    } else if cache && (sku.contains("input") || sku.contains("read")) {
        ChargeKind::CacheRead
    } else if sku.contains("output") || sku.contains("completion") {
        ChargeKind::Output
    } else {
        ChargeKind::RegularInput
    }
}

/// Whether a SKU bills text inference (as opposed to image, video, etc.).
pub fn is_inference_sku(sku: &str) -> bool {
    let sku = sku.to_ascii_lowercase();
    if NON_INFERENCE_MARKERS.iter().any(|m| sku.contains(m)) {
        return false;
    }
    INFERENCE_MARKERS.iter().any(|m| sku.contains(m))
}

struct Group {
    request: AggregatedRequest,
    cache_read_units: f64,
    cache_write_units: f64,
    reported_cached: u64,
    reported_cache_write: u64,
}

/// Group rows into logical requests.
///
/// Rows sharing a request id form one request; rows without one each become
/// their own request, which over-counts if the source splits such a request
/// across rows. Token counts take the per-field maximum across rows; costs are
/// summed per charge kind.
pub fn aggregate(records: &[LedgerRecord]) -> Aggregation {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0;

    for (position, record) in records.iter().enumerate() {
        let Some(timestamp) = record.parsed_timestamp() else {
            tracing::debug!(timestamp = %record.timestamp, "skipping row with unreadable timestamp");
            skipped += 1;
            continue;
        };

        let (request_id, synthetic) = match record.request_id() {
            Some(id) => (id.to_string(), false),
            None => (format!("row-{}@{}", position, record.timestamp), true),
        };

        let slot = *index.entry(request_id.clone()).or_insert_with(|| {
            groups.push(Group {
                request: AggregatedRequest {
                    request_id,
                    synthetic_id: synthetic,
                    model: model_id_from_sku(&record.sku),
                    currency: record.currency.clone(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    cached_tokens: 0,
                    cache_write_tokens: 0,
                    costs: ChargeCosts::default(),
                    rows: 0,
                    inference: false,
                    timestamp,
                    date: timestamp.date_naive(),
                },
                cache_read_units: 0.0,
                cache_write_units: 0.0,
                reported_cached: 0,
                reported_cache_write: 0,
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        let request = &mut group.request;
        request.rows += 1;
        if timestamp < request.timestamp {
            request.timestamp = timestamp;
            request.date = timestamp.date_naive();
        }

        if let Some(details) = &record.inference_details {
            request.inference = true;
            request.prompt_tokens = request.prompt_tokens.max(details.prompt_tokens);
            request.completion_tokens = request.completion_tokens.max(details.completion_tokens);
            group.reported_cached = group
                .reported_cached
                .max(details.cache_read_tokens.unwrap_or(0));
            group.reported_cache_write = group
                .reported_cache_write
                .max(details.cache_write_tokens.unwrap_or(0));
        }
        if is_inference_sku(&record.sku) {
            request.inference = true;
        }

        let kind = classify_sku(&record.sku);
        request.costs.add(kind, record.cost());
        match kind {
            ChargeKind::CacheRead => group.cache_read_units += record.units.abs(),
            ChargeKind::CacheWrite => group.cache_write_units += record.units.abs(),
            _ => {}
        }
    }

    let mut requests: Vec<AggregatedRequest> = groups
        .into_iter()
        .map(|mut group| {
            let request = &mut group.request;
            request.cached_tokens = units_to_tokens(group.cache_read_units).max(group.reported_cached);
            request.cache_write_tokens =
                units_to_tokens(group.cache_write_units).max(group.reported_cache_write);
            group.request
        })
        .collect();

    requests.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.request_id.cmp(&b.request_id))
    });

    Aggregation { requests, skipped }
}

/// Cache units are billed in millions of tokens.
fn units_to_tokens(units: f64) -> u64 {
    (units * TOKENS_PER_UNIT).round() as u64
}
