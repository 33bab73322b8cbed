use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Feature flags used to decide whether one model can stand in for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FunctionCalling,
    Vision,
    Reasoning,
    Uncensored,
    ResponseSchema,
    OptimizedForCode,
}

/// Token prices in USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTerms {
    pub input: f64,
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_input: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<f64>,
}

impl PriceTerms {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cache_input: None,
            cache_write: None,
        }
    }

    /// Cached prompt rate; without a published rate no discount is assumed.
    pub fn cache_input_rate(&self) -> f64 {
        self.cache_input.unwrap_or(self.input)
    }

    pub fn cache_write_rate(&self) -> f64 {
        self.cache_write.unwrap_or(self.input)
    }

    /// Cost of a typical chat token mix, weighted 1:3 input:output.
    pub fn blended(&self) -> f64 {
        (self.input + 3.0 * self.output) / 4.0
    }
}

impl Default for PriceTerms {
    fn default() -> Self {
        FALLBACK_TERMS
    }
}

/// Terms applied to models the catalog does not know.
pub const FALLBACK_TERMS: PriceTerms = PriceTerms {
    input: 0.60,
    output: 6.00,
    cache_input: Some(0.06),
    cache_write: Some(0.75),
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub terms: PriceTerms,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    /// Beta models are priced but never suggested as substitutes.
    #[serde(default)]
    pub beta: bool,
}

impl ModelEntry {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Where a resolved price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Catalog,
    Fallback,
}

impl PriceSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

struct BuiltinModel {
    id: &'static str,
    name: &'static str,
    input: f64,
    output: f64,
    capabilities: &'static [Capability],
    beta: bool,
}

use Capability::{FunctionCalling as Fc, Reasoning, Uncensored, Vision};

static BUILTIN_MODELS: &[BuiltinModel] = &[
    BuiltinModel { id: "qwen3-4b", name: "Venice Small", input: 0.05, output: 0.15, capabilities: &[Fc, Reasoning], beta: false },
    BuiltinModel { id: "qwen3-235b-a22b-instruct-2507", name: "Qwen 3 235B A22B Instruct 2507", input: 0.15, output: 0.75, capabilities: &[Fc], beta: false },
    BuiltinModel { id: "llama-3.2-3b", name: "Llama 3.2 3B", input: 0.15, output: 0.60, capabilities: &[Fc], beta: false },
    BuiltinModel { id: "venice-uncensored", name: "Venice Uncensored 1.1", input: 0.20, output: 0.90, capabilities: &[Uncensored], beta: false },
    BuiltinModel { id: "qwen3-235b-a22b-thinking-2507", name: "Qwen 3 235B A22B Thinking 2507", input: 0.45, output: 3.50, capabilities: &[Fc, Reasoning], beta: false },
    BuiltinModel { id: "qwen3-235b", name: "Venice Large (D)", input: 0.45, output: 3.50, capabilities: &[Fc, Reasoning], beta: false },
    BuiltinModel { id: "mistral-31-24b", name: "Venice Medium (3.1)", input: 0.50, output: 2.00, capabilities: &[Fc, Vision], beta: false },
    BuiltinModel { id: "llama-3.3-70b", name: "Llama 3.3 70B", input: 0.70, output: 2.80, capabilities: &[Fc], beta: false },
    BuiltinModel { id: "qwen3-coder-480b-a35b-instruct", name: "Qwen 3 Coder 480B", input: 0.75, output: 3.00, capabilities: &[Fc], beta: false },
    BuiltinModel { id: "zai-org-glm-4.6", name: "GLM 4.6", input: 0.85, output: 2.75, capabilities: &[Fc], beta: false },
    BuiltinModel { id: "openai-gpt-oss-120b", name: "OpenAI GPT OSS 120B", input: 0.07, output: 0.30, capabilities: &[Fc], beta: true },
    BuiltinModel { id: "google-gemma-3-27b-it", name: "Google Gemma 3 27B", input: 0.12, output: 0.20, capabilities: &[Fc, Vision], beta: true },
    BuiltinModel { id: "qwen3-next-80b", name: "Qwen 3 Next 80B", input: 0.35, output: 1.90, capabilities: &[Fc], beta: true },
    BuiltinModel { id: "deepseek-ai-DeepSeek-R1", name: "DeepSeek R1", input: 0.85, output: 2.75, capabilities: &[Fc], beta: true },
    BuiltinModel { id: "hermes-3-llama-3.1-405b", name: "Hermes 3 Llama 3.1 405B", input: 1.10, output: 3.00, capabilities: &[], beta: true },
];

const SKU_SUFFIXES: &[&str] = &[
    "-llm-input-mtoken",
    "-llm-output-mtoken",
    "-llm-input",
    "-llm-output",
    "-mtoken",
    "-input",
    "-output",
    "-tokens",
];

/// Reduce a billing SKU to the model id it bills for.
/// Examples:
///   "llama-3.3-70b-llm-input-mtoken" -> "llama-3.3-70b"
///   "qwen3-4b-llm-cache-read-mtoken" -> "qwen3-4b"
///   "zai-org-glm-4.6-output" -> "zai-org-glm-4.6"
pub fn model_id_from_sku(sku: &str) -> String {
    let mut base = match sku.find("-llm-") {
        Some(idx) => sku[..idx].to_string(),
        None => sku.to_string(),
    };
    for suffix in SKU_SUFFIXES {
        base = base.replace(suffix, "");
    }
    base.trim_matches('-').to_string()
}

/// Model prices and capabilities for one analysis run.
///
/// Built from the embedded table, then overlaid with configured overrides
/// and whatever the pricing endpoint returned.
#[derive(Debug, Clone)]
pub struct PricingCatalog {
    models: BTreeMap<String, ModelEntry>,
    fallback: PriceTerms,
}

impl PricingCatalog {
    pub fn empty(fallback: PriceTerms) -> Self {
        Self {
            models: BTreeMap::new(),
            fallback,
        }
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty(FALLBACK_TERMS);
        for model in BUILTIN_MODELS {
            catalog.insert(ModelEntry {
                id: model.id.to_string(),
                name: model.name.to_string(),
                terms: PriceTerms::new(model.input, model.output),
                capabilities: model.capabilities.iter().copied().collect(),
                beta: model.beta,
            });
        }
        catalog
    }

    pub fn with_fallback(mut self, fallback: PriceTerms) -> Self {
        self.fallback = fallback;
        self
    }

    /// Insert or replace an entry. A replacement without a display name keeps
    /// the previous one.
    pub fn insert(&mut self, mut entry: ModelEntry) {
        if entry.name.is_empty() {
            if let Some(existing) = self.models.get(&entry.id) {
                entry.name = existing.name.clone();
            }
        }
        self.models.insert(entry.id.clone(), entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ModelEntry>) {
        for entry in entries {
            self.insert(entry);
        }
    }

    /// Look up a model by id or SKU. Returns None if unknown.
    pub fn lookup(&self, model: &str) -> Option<&ModelEntry> {
        self.models
            .get(model)
            .or_else(|| self.models.get(&model_id_from_sku(model)))
    }

    /// Price terms for a model, degrading to the fallback for unknown ids.
    pub fn resolve(&self, model: &str) -> (PriceTerms, PriceSource) {
        match self.lookup(model) {
            Some(entry) => (entry.terms, PriceSource::Catalog),
            None => {
                tracing::debug!(model, "no catalog entry, using fallback pricing");
                (self.fallback, PriceSource::Fallback)
            }
        }
    }

    pub fn display_name(&self, model: &str) -> String {
        self.lookup(model)
            .map(|entry| entry.display_name().to_string())
            .unwrap_or_else(|| model.to_string())
    }

    pub fn capabilities(&self, model: &str) -> BTreeSet<Capability> {
        self.lookup(model)
            .map(|entry| entry.capabilities.clone())
            .unwrap_or_default()
    }

    /// Non-beta models with a lower blended cost that carry every required
    /// capability, as `(model id, savings percent)` sorted by savings
    /// descending.
    pub fn cheaper_alternatives(
        &self,
        model: &str,
        required: &BTreeSet<Capability>,
    ) -> Vec<(String, f64)> {
        let (terms, _) = self.resolve(model);
        let current = terms.blended();
        if current <= 0.0 {
            return Vec::new();
        }
        let current_id = self.lookup(model).map(|e| e.id.as_str()).unwrap_or(model);

        let mut alternatives: Vec<(String, f64)> = self
            .models
            .values()
            .filter(|alt| !alt.beta && alt.id != current_id)
            .filter(|alt| required.is_subset(&alt.capabilities))
            .filter_map(|alt| {
                let blended = alt.terms.blended();
                (blended < current).then(|| (alt.id.clone(), (current - blended) / current * 100.0))
            })
            .collect();

        alternatives.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        alternatives
    }
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
