use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::core::config::AttributionConfig;
use crate::core::models::cache::{percent, CacheMetrics, DailyCacheStats, ModelCacheStats};
use crate::core::models::cost::{
    AttributionConfidence, CredentialAttribution, CredentialUsage, DailyCost, ModelUsageStats,
};
use crate::core::models::request::AggregatedRequest;
use crate::core::pricing::catalog::PricingCatalog;

fn by_cost_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Per-model and per-day cache roll-ups.
#[derive(Debug, Clone, Default)]
pub struct CacheProfile {
    /// Ranked by total cost, descending.
    pub models: Vec<ModelCacheStats>,
    pub daily: Vec<DailyCacheStats>,
}

/// Roll priced requests up by model and by UTC day. Only inference requests
/// are counted.
pub fn profile_cache(
    priced: &[(AggregatedRequest, CacheMetrics)],
    catalog: &PricingCatalog,
) -> CacheProfile {
    let mut models: HashMap<&str, ModelCacheStats> = HashMap::new();
    let mut daily: BTreeMap<NaiveDate, (DailyCacheStats, BTreeSet<String>)> = BTreeMap::new();

    for (request, metrics) in priced.iter().filter(|(r, _)| r.inference) {
        models
            .entry(request.model.as_str())
            .or_insert_with(|| {
                ModelCacheStats::new(&request.model, &catalog.display_name(&request.model))
            })
            .record(metrics, request.prompt_tokens, request.is_cache_hit());

        let (day, used) = daily
            .entry(request.date)
            .or_insert_with(|| (DailyCacheStats::new(request.date), BTreeSet::new()));
        day.total_requests += 1;
        day.total_prompt_tokens += request.prompt_tokens;
        day.total_cached_tokens += metrics.cached_tokens;
        day.total_cost += metrics.total_cost;
        day.total_savings += metrics.savings;
        used.insert(request.model.clone());
    }

    let mut models: Vec<ModelCacheStats> = models
        .into_values()
        .map(|mut stats| {
            stats.finalize();
            stats
        })
        .collect();
    models.sort_by(|a, b| {
        by_cost_desc(a.total_cost, b.total_cost).then_with(|| a.model_id.cmp(&b.model_id))
    });

    let daily = daily
        .into_values()
        .map(|(mut day, used)| {
            day.cache_hit_rate = percent(
                day.total_cached_tokens as f64,
                day.total_prompt_tokens as f64,
            );
            day.models_used = used.into_iter().collect();
            day
        })
        .collect();

    CacheProfile { models, daily }
}

/// Billed usage grouped by model.
#[derive(Debug, Clone, Default)]
pub struct UsageProfile {
    /// Ranked by total cost, descending.
    pub models: Vec<ModelUsageStats>,
    pub cost_by_currency: BTreeMap<String, f64>,
    pub total_cost: f64,
    pub daily_costs: Vec<DailyCost>,
}

#[derive(Default)]
struct UsageAccumulator {
    requests: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    sampled_tokens: u64,
    samples: u64,
    cost_by_currency: BTreeMap<String, f64>,
}

pub fn profile_usage(
    requests: &[AggregatedRequest],
    catalog: &PricingCatalog,
    credentials: &[CredentialUsage],
    attribution: &AttributionConfig,
) -> UsageProfile {
    let mut by_model: HashMap<&str, UsageAccumulator> = HashMap::new();
    let mut cost_by_currency: BTreeMap<String, f64> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, DailyCost> = BTreeMap::new();

    for request in requests {
        let cost = request.total_cost();
        let acc = by_model.entry(request.model.as_str()).or_default();
        // Image and other non-inference charges bill but are not requests.
        if request.inference {
            acc.requests += 1;
            acc.prompt_tokens += request.prompt_tokens;
            acc.completion_tokens += request.completion_tokens;
            let tokens = request.total_tokens();
            if tokens > 0 {
                acc.sampled_tokens += tokens;
                acc.samples += 1;
            }
        }
        *acc.cost_by_currency.entry(request.currency.clone()).or_insert(0.0) += cost;
        *cost_by_currency.entry(request.currency.clone()).or_insert(0.0) += cost;

        let day = daily.entry(request.date).or_insert_with(|| DailyCost {
            date: request.date,
            requests: 0,
            total_cost: 0.0,
        });
        day.requests += 1;
        day.total_cost += cost;
    }

    let total_cost: f64 = cost_by_currency.values().sum();

    let mut models: Vec<ModelUsageStats> = by_model
        .into_iter()
        .map(|(model, acc)| {
            let model_cost: f64 = acc.cost_by_currency.values().sum();
            ModelUsageStats {
                model_id: model.to_string(),
                display_name: catalog.display_name(model),
                request_count: acc.requests,
                prompt_tokens: acc.prompt_tokens,
                completion_tokens: acc.completion_tokens,
                total_tokens: acc.prompt_tokens + acc.completion_tokens,
                avg_tokens_per_request: if acc.samples > 0 {
                    acc.sampled_tokens as f64 / acc.samples as f64
                } else {
                    0.0
                },
                percentage_of_total: percent(model_cost, total_cost),
                credentials: attribute_credentials(model_cost, total_cost, credentials, attribution),
                cost_by_currency: acc.cost_by_currency,
                total_cost: model_cost,
            }
        })
        .collect();
    models.sort_by(|a, b| {
        by_cost_desc(a.total_cost, b.total_cost).then_with(|| a.model_id.cmp(&b.model_id))
    });

    UsageProfile {
        models,
        cost_by_currency,
        total_cost,
        daily_costs: daily.into_values().collect(),
    }
}

/// Guess which credentials are behind a model's spend.
///
/// The ledger does not say which credential issued a request, so this only
/// compares spend shares. Every entry carries its confidence tier.
pub fn attribute_credentials(
    model_cost: f64,
    grand_total: f64,
    credentials: &[CredentialUsage],
    thresholds: &AttributionConfig,
) -> Vec<CredentialAttribution> {
    let mut ranked: Vec<&CredentialUsage> = credentials.iter().collect();
    ranked.sort_by(|a, b| by_cost_desc(a.total(), b.total()).then_with(|| a.name.cmp(&b.name)));

    let tag = |credential: &CredentialUsage, confidence| CredentialAttribution {
        credential: credential.name.clone(),
        confidence,
    };

    match ranked.as_slice() {
        [] => return Vec::new(),
        [only] => return vec![tag(*only, AttributionConfidence::Confirmed)],
        _ => {}
    }

    if grand_total <= 0.0 {
        return ranked
            .iter()
            .map(|c| tag(*c, AttributionConfidence::Possibly))
            .collect();
    }

    let model_share = model_cost / grand_total * 100.0;
    let top = ranked[0];

    if model_share > thresholds.dominant_model_percent {
        let top_share = top.total() / grand_total * 100.0;
        if top_share > thresholds.dominant_credential_percent {
            return vec![tag(top, AttributionConfidence::Likely)];
        }
        return ranked
            .iter()
            .take(2)
            .map(|c| tag(*c, AttributionConfidence::Likely))
            .collect();
    }

    if model_share > thresholds.significant_model_percent {
        return vec![
            tag(top, AttributionConfidence::Likely),
            tag(ranked[1], AttributionConfidence::Possibly),
        ];
    }

    let floor = grand_total * thresholds.relevance_floor_percent / 100.0;
    let relevant: Vec<CredentialAttribution> = ranked
        .iter()
        .filter(|c| c.total() >= floor)
        .map(|c| tag(*c, AttributionConfidence::Possibly))
        .collect();
    if !relevant.is_empty() {
        return relevant;
    }
    ranked
        .iter()
        .take(3)
        .map(|c| tag(*c, AttributionConfidence::Possibly))
        .collect()
}
