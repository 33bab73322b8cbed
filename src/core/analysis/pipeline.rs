use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::aggregate::aggregate;
use super::economics::compute_metrics;
use super::profiler::{profile_cache, profile_usage};
use super::recommend::{
    cache_recommendations, estimate_potential_savings, generate_recommendations,
    lowest_hit_rate_models, monthly_savings, top_saving_models,
};
use crate::core::config::AppConfig;
use crate::core::ledger::{LedgerSync, SyncMode, SyncOutcome};
use crate::core::models::cache::{percent, CacheMetrics, CachePerformanceReport};
use crate::core::models::cost::{CostOptimizationReport, CredentialUsage};
use crate::core::models::ledger::LedgerRecord;
use crate::core::models::request::AggregatedRequest;
use crate::core::pricing::{load_catalog, PricingCatalog};

/// What the sync step did, in a form the presentation layer can show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub mode: SyncMode,
    pub last_fetch: Option<DateTime<Utc>>,
    pub pages: u32,
    pub fetched: usize,
    pub added: usize,
    pub pruned: usize,
    pub truncated: bool,
    pub persisted: bool,
    pub stale: bool,
    pub error: Option<String>,
}

impl From<&SyncOutcome> for SyncSummary {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            mode: outcome.mode,
            last_fetch: outcome.last_fetch,
            pages: outcome.pages,
            fetched: outcome.fetched,
            added: outcome.added,
            pruned: outcome.pruned,
            truncated: outcome.truncated,
            persisted: outcome.persisted,
            stale: outcome.is_stale(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Both reports for one window, fully computed.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub cache: CachePerformanceReport,
    pub cost: CostOptimizationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSummary>,
}

/// Turn ledger rows into the cache and cost reports.
pub fn analyze(
    records: &[LedgerRecord],
    catalog: &PricingCatalog,
    credentials: Vec<CredentialUsage>,
    config: &AppConfig,
    window_days: u32,
    now: DateTime<Utc>,
) -> Report {
    let window_days = window_days.max(1);
    let start_date = (now - Duration::days(window_days as i64)).date_naive();
    let end_date = now.date_naive();

    let aggregation = aggregate(records);
    tracing::debug!(
        rows = records.len(),
        requests = aggregation.requests.len(),
        skipped = aggregation.skipped,
        "aggregated ledger rows"
    );

    let usage = profile_usage(
        &aggregation.requests,
        catalog,
        &credentials,
        &config.attribution,
    );
    let cost_fallbacks = aggregation
        .requests
        .iter()
        .filter(|r| catalog.lookup(&r.model).is_none())
        .count() as u64;
    let recommendations = generate_recommendations(&usage.models, catalog, &config.analysis);

    let cost = CostOptimizationReport {
        analysis_period_days: window_days,
        start_date,
        end_date,
        generated_at: now,
        total_cost: usage.total_cost,
        cost_by_currency: usage.cost_by_currency,
        model_breakdown: usage.models,
        potential_monthly_savings: monthly_savings(&recommendations, window_days),
        recommendations,
        daily_costs: usage.daily_costs,
        credentials,
        skipped_records: aggregation.skipped,
        pricing_fallbacks: cost_fallbacks,
    };

    let priced: Vec<(AggregatedRequest, CacheMetrics)> = aggregation
        .requests
        .into_iter()
        .map(|request| {
            let metrics = compute_metrics(&request, catalog);
            (request, metrics)
        })
        .collect();
    let profile = profile_cache(&priced, catalog);

    let mut cache = CachePerformanceReport {
        start_date,
        end_date,
        period_days: window_days,
        generated_at: now,
        total_requests: 0,
        total_prompt_tokens: 0,
        total_cached_tokens: 0,
        total_cost: 0.0,
        total_cost_without_cache: 0.0,
        total_savings: 0.0,
        overall_cache_hit_rate: 0.0,
        overall_savings_percent: 0.0,
        top_saving_models: top_saving_models(&profile.models),
        lowest_hit_rate_models: lowest_hit_rate_models(
            &profile.models,
            config.analysis.cache_min_requests,
        ),
        recommendations: cache_recommendations(&profile.models, catalog, &config.analysis),
        potential_savings: estimate_potential_savings(&profile.models, catalog, &config.analysis),
        model_stats: Vec::new(),
        daily_stats: profile.daily,
        skipped_records: aggregation.skipped,
        pricing_fallbacks: 0,
    };
    for stats in &profile.models {
        cache.total_requests += stats.total_requests;
        cache.total_prompt_tokens += stats.total_prompt_tokens;
        cache.total_cached_tokens += stats.total_cached_tokens;
        cache.total_cost += stats.total_cost;
        cache.total_cost_without_cache += stats.cost_without_cache;
        cache.total_savings += stats.total_savings;
        cache.pricing_fallbacks += stats.pricing_fallbacks;
    }
    cache.overall_cache_hit_rate = percent(
        cache.total_cached_tokens as f64,
        cache.total_prompt_tokens as f64,
    );
    cache.overall_savings_percent = percent(cache.total_savings, cache.total_cost_without_cache);
    cache.model_stats = profile.models;

    Report {
        cache,
        cost,
        sync: None,
    }
}

pub async fn run(
    config: &AppConfig,
    sync: &LedgerSync,
    window_days: u32,
    cancel: &CancellationToken,
) -> Report {
    run_at(config, sync, window_days, Utc::now(), cancel).await
}

/// Sync the ledger, then build both reports from whatever records are
/// available. Network failures only degrade the output.
pub async fn run_at(
    config: &AppConfig,
    sync: &LedgerSync,
    window_days: u32,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Report {
    let outcome = sync.sync_at(now, window_days, cancel).await;

    // After a cancel the remaining lookups are skipped, not retried.
    let client = sync.client().filter(|_| !cancel.is_cancelled());
    let credentials = match client {
        Some(client) => client.fetch_credentials().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "credential usage unavailable, skipping attribution");
            Vec::new()
        }),
        None => Vec::new(),
    };
    let catalog = load_catalog(&config.pricing, client).await;

    let mut report = analyze(
        &outcome.records,
        &catalog,
        credentials,
        config,
        window_days,
        now,
    );
    report.cache.skipped_records += outcome.skipped;
    report.cost.skipped_records += outcome.skipped;
    report.sync = Some(SyncSummary::from(&outcome));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AnalysisConfig, LedgerConfig};
    use crate::core::ledger::snapshot::RefreshPolicy;
    use crate::core::ledger::LedgerClient;
    use crate::core::models::cost::{AttributionConfidence, Confidence};
    use crate::core::pricing::catalog::{Capability, ModelEntry, PriceTerms};
    use chrono::TimeZone;
    use mockito::Matcher;
    use std::collections::BTreeSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 29, 12, 0, 0).unwrap()
    }

    fn row(sku: &str, amount: f64, ts: &str, request_id: &str, prompt: u64) -> serde_json::Value {
        serde_json::json!({
            "sku": sku,
            "amount": -amount,
            "currency": "DIEM",
            "units": 0.001,
            "timestamp": ts,
            "inferenceDetails": { "requestId": request_id, "promptTokens": prompt, "completionTokens": 200 }
        })
    }

    fn records(rows: Vec<serde_json::Value>) -> Vec<LedgerRecord> {
        rows.into_iter()
            .map(|r| serde_json::from_value(r).unwrap())
            .collect()
    }

    fn entry(id: &str, input: f64, output: f64, caps: &[Capability]) -> ModelEntry {
        ModelEntry {
            id: id.to_string(),
            name: String::new(),
            terms: PriceTerms::new(input, output),
            capabilities: caps.iter().copied().collect::<BTreeSet<_>>(),
            beta: false,
        }
    }

    fn scenario_entries() -> Vec<ModelEntry> {
        vec![
            entry("m1", 1.0, 4.0, &[Capability::Vision]),
            entry("m2", 0.5, 2.0, &[Capability::Vision]),
            entry("m3", 0.01, 0.01, &[]),
        ]
    }

    fn scenario_catalog() -> PricingCatalog {
        let mut catalog = PricingCatalog::empty(PriceTerms::new(1.0, 1.0));
        catalog.extend(scenario_entries());
        catalog
    }

    fn scenario_config() -> AppConfig {
        AppConfig {
            analysis: AnalysisConfig {
                min_request_count: 1,
                ..AnalysisConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn scenario_rows() -> Vec<serde_json::Value> {
        vec![
            row("m1-llm-input-mtoken", 0.10, "2025-11-29T09:00:00Z", "a", 2000),
            row("m1-llm-input-mtoken", 0.12, "2025-11-29T10:00:00Z", "b", 2000),
            row("m1-llm-input-mtoken", 0.08, "2025-11-28T10:00:00Z", "c", 2000),
            row("m3-llm-input-mtoken", 0.01, "2025-11-28T11:00:00Z", "d", 2000),
        ]
    }

    #[test]
    fn substitution_scenario_yields_single_recommendation() {
        let report = analyze(
            &records(scenario_rows()),
            &scenario_catalog(),
            Vec::new(),
            &scenario_config(),
            7,
            now(),
        );

        let recs = &report.cost.recommendations;
        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.current_model_id, "m1");
        assert_eq!(rec.recommended_model_id, "m2");
        assert_eq!(rec.usage_count, 3);
        assert!((rec.savings_percent - 50.0).abs() < 1e-9);
        assert!((rec.savings_amount - 0.3 * rec.savings_percent / 100.0).abs() < 1e-9);
        assert_eq!(rec.confidence, Confidence::Medium);
        assert!((report.cost.potential_monthly_savings - rec.savings_amount * 30.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn reports_carry_totals_and_window() {
        let report = analyze(
            &records(scenario_rows()),
            &scenario_catalog(),
            Vec::new(),
            &scenario_config(),
            7,
            now(),
        );

        assert!((report.cost.total_cost - 0.31).abs() < 1e-9);
        assert!((report.cost.cost_by_currency["DIEM"] - 0.31).abs() < 1e-9);
        assert_eq!(report.cost.model_breakdown[0].model_id, "m1");
        assert_eq!(report.cost.daily_costs.len(), 2);
        assert_eq!(report.cost.start_date.to_string(), "2025-11-22");
        assert_eq!(report.cost.end_date.to_string(), "2025-11-29");

        assert_eq!(report.cache.total_requests, 4);
        assert_eq!(report.cache.total_prompt_tokens, 8000);
        assert_eq!(report.cache.overall_cache_hit_rate, 0.0);
        assert_eq!(report.cache.daily_stats.len(), 2);
        assert_eq!(report.cache.pricing_fallbacks, 0);
    }

    #[test]
    fn unreadable_rows_and_unknown_models_are_counted() {
        let mut rows = scenario_rows();
        rows.push(row("mystery-llm-input-mtoken", 0.05, "2025-11-29T11:00:00Z", "e", 100));
        rows.push(row("m1-llm-input-mtoken", 0.05, "yesterday", "f", 100));

        let report = analyze(
            &records(rows),
            &scenario_catalog(),
            Vec::new(),
            &scenario_config(),
            7,
            now(),
        );
        assert_eq!(report.cost.skipped_records, 1);
        assert_eq!(report.cache.skipped_records, 1);
        assert_eq!(report.cost.pricing_fallbacks, 1);
        assert_eq!(report.cache.pricing_fallbacks, 1);
    }

    #[test]
    fn image_generation_spend_gets_no_text_substitute() {
        let rows = (0..12)
            .map(|i| {
                serde_json::json!({
                    "sku": "flux-dev-image-generation",
                    "amount": -0.04,
                    "currency": "USD",
                    "units": 1.0,
                    "timestamp": format!("2025-11-29T{:02}:00:00Z", i),
                })
            })
            .collect();

        let report = analyze(
            &records(rows),
            &PricingCatalog::builtin(),
            Vec::new(),
            &AppConfig::default(),
            7,
            now(),
        );

        assert!(report.cost.recommendations.is_empty());
        assert_eq!(report.cost.potential_monthly_savings, 0.0);
        let flux = &report.cost.model_breakdown[0];
        assert_eq!(flux.model_id, "flux-dev-image-generation");
        assert_eq!(flux.request_count, 0);
        assert!((flux.total_cost - 0.48).abs() < 1e-9);
        assert_eq!(report.cost.pricing_fallbacks, 12);
        assert_eq!(report.cache.total_requests, 0);
    }

    #[test]
    fn empty_ledger_gives_empty_reports() {
        let report = analyze(&[], &PricingCatalog::builtin(), Vec::new(), &AppConfig::default(), 7, now());
        assert_eq!(report.cost.total_cost, 0.0);
        assert!(report.cost.recommendations.is_empty());
        assert_eq!(report.cache.overall_savings_percent, 0.0);
        assert!(report.cache.model_stats.is_empty());
    }

    fn pipeline_for(server: &mockito::Server, dir: &tempfile::TempDir) -> (AppConfig, LedgerSync) {
        let mut config = scenario_config();
        config.ledger = LedgerConfig {
            base_url: server.url(),
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
            ..LedgerConfig::default()
        };
        config.pricing.fetch_remote = false;
        config.pricing.models = scenario_entries();
        let client = LedgerClient::new(&config.ledger, "admin".into()).unwrap();
        let sync = LedgerSync::new(
            Some(client),
            dir.path().join("snap.json"),
            RefreshPolicy::default(),
            20,
        );
        (config, sync)
    }

    #[tokio::test]
    async fn run_syncs_attributes_and_reports() {
        let mut server = mockito::Server::new_async().await;
        let usage = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                serde_json::json!({ "data": scenario_rows(), "pagination": { "totalPages": 1 } })
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api_keys")
            .with_status(200)
            .with_body(
                r#"{"data":[{"id":"k1","description":"prod","usage":{"trailingSevenDays":{"diem":"0.31","usd":"0"}}}]}"#,
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (config, sync) = pipeline_for(&server, &dir);
        let report = run_at(&config, &sync, 7, now(), &CancellationToken::new()).await;

        let summary = report.sync.as_ref().unwrap();
        assert_eq!(summary.mode, SyncMode::Full);
        assert!(!summary.stale);
        assert_eq!(report.cost.credentials.len(), 1);
        let attribution = &report.cost.model_breakdown[0].credentials;
        assert_eq!(attribution[0].confidence, AttributionConfidence::Confirmed);
        assert_eq!(report.cost.recommendations.len(), 1);
        usage.assert_async().await;
    }

    #[tokio::test]
    async fn run_degrades_when_ledger_refuses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("admin key required")
            .create_async()
            .await;
        server
            .mock("GET", "/api_keys")
            .with_status(403)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (config, sync) = pipeline_for(&server, &dir);
        let report = run_at(&config, &sync, 7, now(), &CancellationToken::new()).await;

        let summary = report.sync.as_ref().unwrap();
        assert!(summary.stale);
        assert!(summary.error.is_some());
        assert!(report.cost.credentials.is_empty());
        assert_eq!(report.cache.total_requests, 0);
    }
}
