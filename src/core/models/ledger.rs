use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-request detail block attached to inference charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(
        default,
        alias = "inferenceExecutionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_time_ms: Option<u64>,
}

/// One billed line item exactly as delivered by the usage endpoint.
///
/// `sku`, `amount`, `currency` and `timestamp` are required; a row missing any
/// of them fails to deserialize and is skipped by the page parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub sku: String,
    /// Signed: charges are reported as negative amounts.
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub units: f64,
    #[serde(default, rename = "pricePerUnitUsd")]
    pub unit_price: f64,
    /// ISO-8601, kept verbatim; snapshot dedup compares this string exactly.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_details: Option<InferenceDetails>,
}

impl LedgerRecord {
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.inference_details
            .as_ref()
            .and_then(|d| d.request_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Billed cost as a positive number.
    pub fn cost(&self) -> f64 {
        self.amount.abs()
    }
}

/// Parse an ISO-8601 timestamp, tolerating a missing offset (assumed UTC).
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Accept a number, a numeric string, or null (as 0.0). Several admin
/// endpoints report amounts as strings.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
        Null(()),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Amount::Null(()) => Ok(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: &str = r#"{
        "sku": "llama-3.3-70b-llm-input-mtoken",
        "amount": -0.0123,
        "currency": "DIEM",
        "units": 0.00175,
        "pricePerUnitUsd": 0.7,
        "timestamp": "2025-11-29T10:00:00.123Z",
        "notes": "LLM Inference",
        "inferenceDetails": {
            "requestId": "req_1",
            "promptTokens": 1750,
            "completionTokens": 420,
            "inferenceExecutionTime": 812
        }
    }"#;

    #[test]
    fn deserialize_api_row() {
        let record: LedgerRecord = serde_json::from_str(ROW).unwrap();
        assert_eq!(record.sku, "llama-3.3-70b-llm-input-mtoken");
        assert_eq!(record.request_id(), Some("req_1"));
        assert!((record.cost() - 0.0123).abs() < 1e-12);
        let details = record.inference_details.as_ref().unwrap();
        assert_eq!(details.prompt_tokens, 1750);
        assert_eq!(details.execution_time_ms, Some(812));
        assert!(details.cache_read_tokens.is_none());
    }

    #[test]
    fn missing_required_field_fails() {
        let json = r#"{ "sku": "x-llm-input-mtoken", "amount": -1.0, "currency": "USD" }"#;
        assert!(serde_json::from_str::<LedgerRecord>(json).is_err());
    }

    #[test]
    fn empty_request_id_is_treated_as_absent() {
        let json = r#"{
            "sku": "x", "amount": -1.0, "currency": "USD",
            "timestamp": "2025-11-29T10:00:00Z",
            "inferenceDetails": { "requestId": "" }
        }"#;
        let record: LedgerRecord = serde_json::from_str(json).unwrap();
        assert!(record.request_id().is_none());
    }

    #[test]
    fn parse_timestamp_variants() {
        assert!(parse_timestamp("2025-11-29T10:00:00Z").is_some());
        assert!(parse_timestamp("2025-11-29T10:00:00.5+02:00").is_some());
        assert!(parse_timestamp("2025-11-29T10:00:00.123").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn lenient_amounts_accept_strings() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "lenient_f64")]
            value: f64,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"value": "12.5"}"#).unwrap();
        assert_eq!(parsed.value, 12.5);
        let parsed: Wrapper = serde_json::from_str(r#"{"value": 3}"#).unwrap();
        assert_eq!(parsed.value, 3.0);
        let parsed: Wrapper = serde_json::from_str(r#"{"value": null}"#).unwrap();
        assert_eq!(parsed.value, 0.0);
        assert!(serde_json::from_str::<Wrapper>(r#"{"value": "n/a"}"#).is_err());
    }

    #[test]
    fn serialization_roundtrips_camel_case_keys() {
        let record: LedgerRecord = serde_json::from_str(ROW).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"inferenceDetails\""));
        assert!(json.contains("\"pricePerUnitUsd\""));
        let back: LedgerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
