use crate::core::models::cache::{percent, CacheMetrics};
use crate::core::models::request::AggregatedRequest;
use crate::core::pricing::catalog::PricingCatalog;

const PER_MILLION: f64 = 1_000_000.0;

fn priced(tokens: u64, rate_per_million: f64) -> f64 {
    tokens as f64 * rate_per_million / PER_MILLION
}

/// Price a request with and without prompt caching.
///
/// The counterfactual re-prices the whole prompt at the full input rate.
/// Cache-write cost has no counterfactual, so `savings` leaves it out while
/// `net_savings` includes it. Neither is clamped.
pub fn compute_metrics(request: &AggregatedRequest, catalog: &PricingCatalog) -> CacheMetrics {
    let (terms, source) = catalog.resolve(&request.model);

    let regular_prompt_tokens = request.prompt_tokens.saturating_sub(request.cached_tokens);
    let cache_read_cost = priced(request.cached_tokens, terms.cache_input_rate());
    let cache_write_cost = priced(request.cache_write_tokens, terms.cache_write_rate());
    let regular_input_cost = priced(regular_prompt_tokens, terms.input);
    let output_cost = priced(request.completion_tokens, terms.output);

    let total_cost = cache_read_cost + cache_write_cost + regular_input_cost + output_cost;
    let cost_without_cache = priced(request.prompt_tokens, terms.input) + output_cost;
    let savings = cost_without_cache - (cache_read_cost + regular_input_cost + output_cost);

    CacheMetrics {
        cached_tokens: request.cached_tokens,
        cache_write_tokens: request.cache_write_tokens,
        regular_prompt_tokens,
        completion_tokens: request.completion_tokens,
        cache_read_cost,
        cache_write_cost,
        regular_input_cost,
        output_cost,
        total_cost,
        cost_without_cache,
        savings,
        net_savings: cost_without_cache - total_cost,
        savings_percent: percent(savings, cost_without_cache),
        pricing_fallback: source.is_fallback(),
    }
}
