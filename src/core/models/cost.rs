use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How sure the attribution heuristic is that a credential drove a model's spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionConfidence {
    Confirmed,
    Likely,
    Possibly,
}

impl fmt::Display for AttributionConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Likely => write!(f, "Likely"),
            Self::Possibly => write!(f, "Possibly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialAttribution {
    pub credential: String,
    pub confidence: AttributionConfidence,
}

impl fmt::Display for CredentialAttribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.confidence, self.credential)
    }
}

/// Trailing seven-day spend of one API credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialUsage {
    pub id: String,
    pub name: String,
    pub diem: f64,
    pub usd: f64,
}

impl CredentialUsage {
    pub fn total(&self) -> f64 {
        self.diem + self.usd
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsageStats {
    pub model_id: String,
    pub display_name: String,
    pub request_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub avg_tokens_per_request: f64,
    pub cost_by_currency: BTreeMap<String, f64>,
    pub total_cost: f64,
    pub percentage_of_total: f64,
    pub credentials: Vec<CredentialAttribution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSavingsRecommendation {
    pub current_model_id: String,
    pub current_model_name: String,
    pub recommended_model_id: String,
    pub recommended_model_name: String,
    pub current_cost: f64,
    pub potential_cost: f64,
    pub savings_amount: f64,
    pub savings_percent: f64,
    pub usage_count: u64,
    pub reason: String,
    pub confidence: Confidence,
    pub credentials: Vec<CredentialAttribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub requests: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostOptimizationReport {
    pub analysis_period_days: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub total_cost: f64,
    pub cost_by_currency: BTreeMap<String, f64>,
    /// Ranked by total cost, descending.
    pub model_breakdown: Vec<ModelUsageStats>,
    /// Ranked by savings amount, descending.
    pub recommendations: Vec<CostSavingsRecommendation>,
    pub potential_monthly_savings: f64,
    pub daily_costs: Vec<DailyCost>,
    pub credentials: Vec<CredentialUsage>,
    pub skipped_records: usize,
    pub pricing_fallbacks: u64,
}
