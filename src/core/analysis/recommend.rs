use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::core::config::AnalysisConfig;
use crate::core::models::cache::{
    CacheOptimizationRecommendation, ModelCacheStats, ModelHighlight, PotentialSavings, Priority,
    RecommendationCategory,
};
use crate::core::models::cost::{Confidence, CostSavingsRecommendation, ModelUsageStats};
use crate::core::pricing::catalog::{Capability, PricingCatalog};

const HIGHLIGHT_COUNT: usize = 5;
const LOW_HIT_RATE: f64 = 20.0;
const VERY_LOW_HIT_RATE: f64 = 10.0;
/// Average request size below which a substitute is rated high confidence.
const HIGH_CONFIDENCE_TOKENS: f64 = 500.0;

/// Suggest at most one cheaper model per sufficiently used model, ranked by
/// projected savings.
pub fn generate_recommendations(
    usage: &[ModelUsageStats],
    catalog: &PricingCatalog,
    config: &AnalysisConfig,
) -> Vec<CostSavingsRecommendation> {
    let mut recommendations: Vec<CostSavingsRecommendation> = usage
        .iter()
        .filter(|stats| stats.request_count >= config.min_request_count)
        .filter_map(|stats| recommend_for(stats, catalog, config))
        .collect();

    recommendations.sort_by(|a, b| {
        b.savings_amount
            .partial_cmp(&a.savings_amount)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.current_model_id.cmp(&b.current_model_id))
    });
    recommendations
}

fn recommend_for(
    stats: &ModelUsageStats,
    catalog: &PricingCatalog,
    config: &AnalysisConfig,
) -> Option<CostSavingsRecommendation> {
    // Without a catalog price there is nothing honest to compare against.
    if catalog.lookup(&stats.model_id).is_none() {
        tracing::debug!(model = %stats.model_id, "no catalog pricing, skipping substitution");
        return None;
    }
    let small = stats.avg_tokens_per_request < config.small_request_tokens;
    let current_caps = catalog.capabilities(&stats.model_id);
    let required = if small {
        BTreeSet::new()
    } else {
        current_caps.clone()
    };

    let (alt_id, savings_percent) = catalog
        .cheaper_alternatives(&stats.model_id, &required)
        .into_iter()
        .next()?;
    if savings_percent < config.min_savings_percent {
        tracing::debug!(
            model = %stats.model_id,
            best = %alt_id,
            savings_percent,
            "best alternative below savings floor"
        );
        return None;
    }

    let alt_name = catalog.display_name(&alt_id);
    let alt_caps = catalog.capabilities(&alt_id);
    let confidence = if small && stats.avg_tokens_per_request < HIGH_CONFIDENCE_TOKENS {
        Confidence::High
    } else if alt_caps.is_superset(&current_caps) {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    let savings_amount = stats.total_cost * savings_percent / 100.0;
    Some(CostSavingsRecommendation {
        current_model_id: stats.model_id.clone(),
        current_model_name: stats.display_name.clone(),
        recommended_model_id: alt_id,
        current_cost: stats.total_cost,
        potential_cost: stats.total_cost - savings_amount,
        savings_amount,
        savings_percent,
        usage_count: stats.request_count,
        reason: reason(&alt_name, &current_caps, &alt_caps, stats.avg_tokens_per_request, small),
        recommended_model_name: alt_name,
        confidence,
        credentials: stats.credentials.clone(),
    })
}

fn reason(
    alt_name: &str,
    current: &BTreeSet<Capability>,
    alternative: &BTreeSet<Capability>,
    avg_tokens: f64,
    small: bool,
) -> String {
    if small {
        format!(
            "Your requests average {:.0} tokens - {} is optimized for smaller requests",
            avg_tokens, alt_name
        )
    } else if current == alternative {
        format!("{} offers identical capabilities at lower cost", alt_name)
    } else {
        format!("{} can handle most of your use cases at lower cost", alt_name)
    }
}

/// Recommendation savings scaled from the analysis window to 30 days.
pub fn monthly_savings(recommendations: &[CostSavingsRecommendation], days: u32) -> f64 {
    let total: f64 = recommendations.iter().map(|r| r.savings_amount).sum();
    if days == 0 {
        total
    } else {
        total * 30.0 / days as f64
    }
}

/// Prompt-caching advice for models with enough traffic, high priority first,
/// then by potential savings.
pub fn cache_recommendations(
    models: &[ModelCacheStats],
    catalog: &PricingCatalog,
    config: &AnalysisConfig,
) -> Vec<CacheOptimizationRecommendation> {
    let mut recommendations = Vec::new();

    for stats in models.iter().filter(|s| s.total_requests >= config.cache_min_requests) {
        let id = &stats.model_id;
        let name = &stats.model_name;

        if stats.cache_hit_rate < LOW_HIT_RATE {
            recommendations.push(CacheOptimizationRecommendation {
                id: format!("rec-{}-hit-rate", id),
                model_id: id.clone(),
                model_name: name.clone(),
                category: RecommendationCategory::PromptStructure,
                priority: if stats.cache_hit_rate < VERY_LOW_HIT_RATE {
                    Priority::High
                } else {
                    Priority::Medium
                },
                title: format!("Low cache hit rate for {}", name),
                description: format!(
                    "The model has only {:.1}% cache hit rate. This may indicate prompt structure issues.",
                    stats.cache_hit_rate
                ),
                current_value: format!("{:.1}% hit rate", stats.cache_hit_rate),
                recommended_value: format!("{:.0}%+ for optimal caching", config.target_hit_rate),
                potential_savings: stats.total_savings * 0.5,
                action_items: vec![
                    "Put static content at the start of prompts".to_string(),
                    "Reuse the same prompt cache key across multi-turn conversations".to_string(),
                    "Keep timestamps and random values out of the prompt prefix".to_string(),
                ],
            });
        }

        if stats.token_cache_hit_rate < stats.cache_hit_rate * 0.8 {
            recommendations.push(CacheOptimizationRecommendation {
                id: format!("rec-{}-token-efficiency", id),
                model_id: id.clone(),
                model_name: name.clone(),
                category: RecommendationCategory::PromptStructure,
                priority: Priority::Medium,
                title: format!("Low token cache efficiency for {}", name),
                description: "Request hit rate is well above token hit rate, so cached prefixes are small."
                    .to_string(),
                current_value: format!(
                    "Request: {:.1}%, Token: {:.1}%",
                    stats.cache_hit_rate, stats.token_cache_hit_rate
                ),
                recommended_value: "Token rate close to request rate".to_string(),
                potential_savings: 0.0,
                action_items: vec![
                    "Grow the static prompt prefix past the minimum cacheable size (~1024 tokens)"
                        .to_string(),
                    "Move more static content ahead of dynamic content".to_string(),
                ],
            });
        }

        let published = catalog
            .lookup(id)
            .and_then(|entry| Some((entry.terms.cache_input?, entry.terms.cache_write?)));
        if let Some((read_rate, write_rate)) = published.filter(|(read, _)| *read > 0.0) {
            let ratio = write_rate / read_rate;
            if ratio > 1.0
                && stats.total_cache_write_tokens as f64 > stats.total_cached_tokens as f64 * 0.5
            {
                recommendations.push(CacheOptimizationRecommendation {
                    id: format!("rec-{}-write-cost", id),
                    model_id: id.clone(),
                    model_name: name.clone(),
                    category: RecommendationCategory::Threshold,
                    priority: Priority::Medium,
                    title: format!("High cache write costs for {}", name),
                    description: "Cache writes cost more than reads; check that reuse justifies them."
                        .to_string(),
                    current_value: format!("Write/Read ratio: {:.1}x", ratio),
                    recommended_value: "2+ reuses per cache write".to_string(),
                    potential_savings: stats.cache_write_cost * 0.3,
                    action_items: vec![
                        "Reuse each cached prompt at least 2-3 times".to_string(),
                        "Use longer static prefixes to amortize the write cost".to_string(),
                    ],
                });
            }
        }
    }

    recommendations.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| {
            b.potential_savings
                .partial_cmp(&a.potential_savings)
                .unwrap_or(Ordering::Equal)
        })
    });
    recommendations
}

/// Savings available if every eligible model reached the target hit rate.
///
/// The extra cached tokens are valued at the model's cache discount
/// (input rate minus cached rate).
pub fn estimate_potential_savings(
    models: &[ModelCacheStats],
    catalog: &PricingCatalog,
    config: &AnalysisConfig,
) -> PotentialSavings {
    let target = config.target_hit_rate;
    let mut estimate = PotentialSavings {
        target_hit_rate: target,
        ..PotentialSavings::default()
    };

    for stats in models.iter().filter(|s| s.total_requests >= config.cache_min_requests) {
        estimate.current_savings += stats.total_savings;
        if stats.cache_hit_rate >= target {
            continue;
        }
        estimate.models_needing_improvement += 1;
        let improvement = (target - stats.cache_hit_rate) / 100.0;
        let extra_tokens = stats.total_prompt_tokens as f64 * improvement;
        let (terms, _) = catalog.resolve(&stats.model_id);
        let discount = (terms.input - terms.cache_input_rate()).max(0.0);
        estimate.additional_savings += extra_tokens * discount / 1_000_000.0;
    }

    estimate.total_potential_savings = estimate.current_savings + estimate.additional_savings;
    estimate
}

/// Models with the largest cache savings.
pub fn top_saving_models(models: &[ModelCacheStats]) -> Vec<ModelHighlight> {
    let mut ranked: Vec<&ModelCacheStats> = models.iter().collect();
    ranked.sort_by(|a, b| {
        b.total_savings
            .partial_cmp(&a.total_savings)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    ranked.into_iter().take(HIGHLIGHT_COUNT).map(ModelHighlight::from).collect()
}

/// Models with the lowest request hit rate among those with enough traffic.
pub fn lowest_hit_rate_models(models: &[ModelCacheStats], min_requests: u64) -> Vec<ModelHighlight> {
    let mut ranked: Vec<&ModelCacheStats> = models
        .iter()
        .filter(|s| s.total_requests >= min_requests)
        .collect();
    ranked.sort_by(|a, b| {
        a.cache_hit_rate
            .partial_cmp(&b.cache_hit_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.total_requests.cmp(&a.total_requests))
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    ranked.into_iter().take(HIGHLIGHT_COUNT).map(ModelHighlight::from).collect()
}
