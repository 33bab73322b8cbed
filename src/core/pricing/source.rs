use std::collections::BTreeSet;

use serde::Deserialize;

use super::catalog::{Capability, ModelEntry, PriceTerms, PricingCatalog};
use crate::core::config::PricingConfig;
use crate::core::error::LedgerError;
use crate::core::ledger::LedgerClient;
use crate::core::models::ledger::lenient_f64;

const MODELS_PATH: &str = "/models";

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RemoteModel {
    id: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    model_spec: RemoteSpec,
}

#[derive(Deserialize, Default)]
struct RemoteSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    beta: bool,
    #[serde(default)]
    pricing: RemotePricing,
    #[serde(default)]
    capabilities: RemoteCapabilities,
}

#[derive(Deserialize, Default)]
struct RemotePricing {
    input: Option<UsdPrice>,
    output: Option<UsdPrice>,
    cache_input: Option<UsdPrice>,
    cache_write: Option<UsdPrice>,
}

#[derive(Deserialize)]
struct UsdPrice {
    #[serde(deserialize_with = "lenient_f64")]
    usd: f64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RemoteCapabilities {
    #[serde(default)]
    supports_vision: bool,
    #[serde(default)]
    supports_function_calling: bool,
    #[serde(default)]
    supports_reasoning: bool,
    #[serde(default)]
    supports_response_schema: bool,
    #[serde(default)]
    optimized_for_code: bool,
}

impl RemoteCapabilities {
    fn to_set(&self) -> BTreeSet<Capability> {
        [
            (self.supports_function_calling, Capability::FunctionCalling),
            (self.supports_vision, Capability::Vision),
            (self.supports_reasoning, Capability::Reasoning),
            (self.supports_response_schema, Capability::ResponseSchema),
            (self.optimized_for_code, Capability::OptimizedForCode),
        ]
        .into_iter()
        .filter_map(|(on, cap)| on.then_some(cap))
        .collect()
    }
}

/// Turn a `/models` response into catalog entries. Models without both an
/// input and an output price, and non-text models, are skipped.
pub fn parse_models(body: serde_json::Value) -> Result<Vec<ModelEntry>, LedgerError> {
    let response: ModelsResponse = serde_json::from_value(body)
        .map_err(|e| LedgerError::MalformedResponse(e.to_string()))?;

    let mut entries = Vec::new();
    for raw in response.data {
        let model: RemoteModel = match serde_json::from_value(raw) {
            Ok(model) => model,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable model entry");
                continue;
            }
        };
        if model.kind.as_deref().is_some_and(|k| k != "text") {
            continue;
        }
        let spec = model.model_spec;
        let (Some(input), Some(output)) = (spec.pricing.input, spec.pricing.output) else {
            tracing::debug!(model = %model.id, "model has no token pricing");
            continue;
        };
        entries.push(ModelEntry {
            name: spec.name.unwrap_or_default(),
            terms: PriceTerms {
                input: input.usd,
                output: output.usd,
                cache_input: spec.pricing.cache_input.map(|p| p.usd),
                cache_write: spec.pricing.cache_write.map(|p| p.usd),
            },
            capabilities: spec.capabilities.to_set(),
            beta: spec.beta,
            id: model.id,
        });
    }
    Ok(entries)
}

pub async fn fetch_models(client: &LedgerClient) -> Result<Vec<ModelEntry>, LedgerError> {
    let body = client
        .get_json(MODELS_PATH, &[("type", "text".to_string())])
        .await?;
    parse_models(body)
}

/// Build the catalog for one run: embedded table, then the pricing endpoint
/// (when reachable), then configured overrides.
pub async fn load_catalog(config: &PricingConfig, client: Option<&LedgerClient>) -> PricingCatalog {
    let mut catalog = PricingCatalog::builtin().with_fallback(config.fallback);

    if config.fetch_remote {
        if let Some(client) = client {
            match fetch_models(client).await {
                Ok(entries) => {
                    tracing::debug!(models = entries.len(), "loaded remote pricing");
                    catalog.extend(entries);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pricing fetch failed, using built-in table");
                }
            }
        }
    }

    catalog.extend(config.models.iter().cloned());
    catalog
}
