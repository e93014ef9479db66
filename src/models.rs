//! Core data models shared by the scan, enrich and write stages.

use serde_json::{Map, Value};

pub const HOSTNAME: &str = "hostname";
pub const LIFECYCLE_STATUS: &str = "operating_system_lifecycle_status";
pub const INSTALLATION_DATE: &str = "operating_system_installation_date";

pub const RISK_LEVEL: &str = "risk_level";
pub const SYSTEM_AGE_YEARS: &str = "system_age_years";
pub const TRANSFORMATION_TIMESTAMP: &str = "transformation_timestamp";
pub const LAST_UPDATED_TIMESTAMP: &str = "last_updated_timestamp";

/// A semi-structured record as held by the store.
///
/// `id` is assigned by the store and is `None` for documents that have not
/// been written yet (the Reindexer lets the target assign fresh ids).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub id: Option<String>,
    pub source: Map<String, Value>,
}

impl Document {
    pub fn new(source: Map<String, Value>) -> Self {
        Self { id: None, source }
    }

    pub fn with_id(id: impl Into<String>, source: Map<String, Value>) -> Self {
        Self {
            id: Some(id.into()),
            source,
        }
    }

    /// Build from a JSON object literal; non-objects yield an empty document.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            _ => Self::default(),
        }
    }

    /// Field value, treating JSON `null` as absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self.source.get(name) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    /// Field rendered as text: strings as-is, numbers and booleans via
    /// their JSON form. Arrays and objects are not text.
    pub fn text_field(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Risk classification derived from the lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    High,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "High",
            RiskLevel::Low => "Low",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One collection as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub doc_count: Option<u64>,
}
