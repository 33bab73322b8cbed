use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Cache economics of a single logical request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub cached_tokens: u64,
    pub cache_write_tokens: u64,
    pub regular_prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_cost: f64,
    pub cache_write_cost: f64,
    pub regular_input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    /// Whole prompt priced at the full input rate, plus output.
    pub cost_without_cache: f64,
    /// Excludes cache-write cost. May be negative.
    pub savings: f64,
    /// Includes cache-write cost. May be negative.
    pub net_savings: f64,
    pub savings_percent: f64,
    /// Set when the model was priced with fallback terms.
    pub pricing_fallback: bool,
}

/// Per-model roll-up of [`CacheMetrics`]. Rates are derived from the sums by
/// [`ModelCacheStats::finalize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCacheStats {
    pub model_id: String,
    pub model_name: String,
    pub total_requests: u64,
    pub cache_hit_requests: u64,
    pub cache_miss_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_cache_write_tokens: u64,
    pub total_regular_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub cache_read_cost: f64,
    pub cache_write_cost: f64,
    pub regular_input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub cost_without_cache: f64,
    pub total_savings: f64,
    pub pricing_fallbacks: u64,
    pub cache_hit_rate: f64,
    pub token_cache_hit_rate: f64,
    pub savings_percent: f64,
}

impl ModelCacheStats {
    pub fn new(model_id: &str, model_name: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            model_name: model_name.to_string(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, metrics: &CacheMetrics, prompt_tokens: u64, hit: bool) {
        self.total_requests += 1;
        if hit {
            self.cache_hit_requests += 1;
        } else {
            self.cache_miss_requests += 1;
        }
        self.total_prompt_tokens += prompt_tokens;
        self.total_cached_tokens += metrics.cached_tokens;
        self.total_cache_write_tokens += metrics.cache_write_tokens;
        self.total_regular_prompt_tokens += metrics.regular_prompt_tokens;
        self.total_completion_tokens += metrics.completion_tokens;
        self.cache_read_cost += metrics.cache_read_cost;
        self.cache_write_cost += metrics.cache_write_cost;
        self.regular_input_cost += metrics.regular_input_cost;
        self.output_cost += metrics.output_cost;
        self.total_cost += metrics.total_cost;
        self.cost_without_cache += metrics.cost_without_cache;
        self.total_savings += metrics.savings;
        if metrics.pricing_fallback {
            self.pricing_fallbacks += 1;
        }
    }

    /// Derive the percentage rates from the accumulated sums.
    pub fn finalize(&mut self) {
        self.cache_hit_rate = percent(self.cache_hit_requests as f64, self.total_requests as f64);
        self.token_cache_hit_rate = percent(
            self.total_cached_tokens as f64,
            self.total_prompt_tokens as f64,
        );
        self.savings_percent = percent(self.total_savings, self.cost_without_cache);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCacheStats {
    pub date: NaiveDate,
    pub total_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_cost: f64,
    pub total_savings: f64,
    /// Token hit rate for the day, in percent.
    pub cache_hit_rate: f64,
    pub models_used: Vec<String>,
}

impl DailyCacheStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total_requests: 0,
            total_prompt_tokens: 0,
            total_cached_tokens: 0,
            total_cost: 0.0,
            total_savings: 0.0,
            cache_hit_rate: 0.0,
            models_used: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    PromptStructure,
    Threshold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOptimizationRecommendation {
    pub id: String,
    pub model_id: String,
    pub model_name: String,
    pub category: RecommendationCategory,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub current_value: String,
    pub recommended_value: String,
    pub potential_savings: f64,
    pub action_items: Vec<String>,
}

/// What raising every eligible model to a target hit rate would be worth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PotentialSavings {
    pub target_hit_rate: f64,
    pub current_savings: f64,
    pub additional_savings: f64,
    pub models_needing_improvement: u64,
    pub total_potential_savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHighlight {
    pub model_id: String,
    pub total_savings: f64,
    pub cache_hit_rate: f64,
    pub total_requests: u64,
}

impl From<&ModelCacheStats> for ModelHighlight {
    fn from(stats: &ModelCacheStats) -> Self {
        Self {
            model_id: stats.model_id.clone(),
            total_savings: stats.total_savings,
            cache_hit_rate: stats.cache_hit_rate,
            total_requests: stats.total_requests,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePerformanceReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub period_days: u32,
    pub generated_at: DateTime<Utc>,
    pub total_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_cost: f64,
    pub total_cost_without_cache: f64,
    pub total_savings: f64,
    pub overall_cache_hit_rate: f64,
    pub overall_savings_percent: f64,
    /// Ranked by total cost, descending.
    pub model_stats: Vec<ModelCacheStats>,
    /// Ascending by date.
    pub daily_stats: Vec<DailyCacheStats>,
    pub top_saving_models: Vec<ModelHighlight>,
    pub lowest_hit_rate_models: Vec<ModelHighlight>,
    pub recommendations: Vec<CacheOptimizationRecommendation>,
    pub potential_savings: PotentialSavings,
    pub skipped_records: usize,
    pub pricing_fallbacks: u64,
}

pub(crate) fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}
