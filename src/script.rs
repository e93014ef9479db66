//! The in-place derived-field patch, as a typed script.
//!
//! [`PatchScript`] is what the FieldUpdater hands to the store. The HTTP
//! store renders it with [`PatchScript::to_painless`]; the in-memory store
//! and the client-side fallback run [`PatchScript::apply`]. Both paths take
//! "today" and "now" from the script parameters, so a single clock reading
//! drives the whole run.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};

use crate::enrich;
use crate::models::{Document, LAST_UPDATED_TIMESTAMP};

/// Painless source mirroring [`enrich::derive`].
///
/// Kept in one literal so the rendered request is stable across runs and
/// can be stored as a script if needed.
const DERIVED_FIELDS_PAINLESS: &str = r#"
def status = ctx._source.operating_system_lifecycle_status;
String normalized = status == null ? '' : status.toString().trim().toUpperCase(Locale.ROOT);
ctx._source.risk_level = (normalized == 'EOL' || normalized == 'EOS') ? 'High' : 'Low';

def raw = ctx._source.operating_system_installation_date;
boolean aged = false;
if (raw != null && !(raw instanceof List) && !(raw instanceof Map)) {
  String text = raw.toString();
  if (!text.equalsIgnoreCase('unknown') && text.length() == 10
      && text.charAt(4) == (char) '-' && text.charAt(7) == (char) '-') {
    try {
      LocalDate installed = LocalDate.parse(text);
      LocalDate today = LocalDate.parse(params.today);
      long years = ChronoUnit.YEARS.between(installed, today);
      ctx._source.system_age_years = (int) Math.max(0L, years);
      aged = true;
    } catch (DateTimeParseException e) {
      aged = false;
    }
  }
}
if (!aged) {
  ctx._source.remove('system_age_years');
}

ctx._source.last_updated_timestamp = params.now_millis;
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchScript {
    /// Recompute `risk_level` and `system_age_years`, stamp
    /// `last_updated_timestamp` with epoch milliseconds.
    DerivedFields { today: NaiveDate, now_millis: i64 },
}

impl PatchScript {
    pub fn derived_fields(now: DateTime<Utc>) -> Self {
        PatchScript::DerivedFields {
            today: now.date_naive(),
            now_millis: now.timestamp_millis(),
        }
    }

    pub fn to_painless(&self) -> Value {
        match self {
            PatchScript::DerivedFields { today, now_millis } => json!({
                "lang": "painless",
                "source": DERIVED_FIELDS_PAINLESS.trim(),
                "params": {
                    "today": today.format("%Y-%m-%d").to_string(),
                    "now_millis": now_millis,
                }
            }),
        }
    }

    /// Apply the patch locally with the same semantics as the store script.
    pub fn apply(&self, doc: &mut Document) {
        match self {
            PatchScript::DerivedFields { today, now_millis } => {
                let derived = enrich::derive(doc, *today);
                enrich::apply_derived(doc, derived);
                doc.source
                    .insert(LAST_UPDATED_TIMESTAMP.to_string(), Value::from(*now_millis));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn script() -> PatchScript {
        PatchScript::derived_fields(Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap())
    }

    #[test]
    fn painless_carries_clock_params() {
        let rendered = script().to_painless();
        assert_eq!(rendered["lang"], "painless");
        assert_eq!(rendered["params"]["today"], "2026-10-14");
        assert_eq!(rendered["params"]["now_millis"], 1_791_979_200_000i64);
        let source = rendered["source"].as_str().unwrap();
        assert!(source.contains("ChronoUnit.YEARS.between(installed, today)"));
        assert!(source.contains("ctx._source.remove('system_age_years')"));
        assert!(source.contains("params.now_millis"));
    }

    #[test]
    fn apply_patches_in_place() {
        let mut doc = Document::with_id(
            "x",
            json!({
                "hostname": "",
                "operating_system_lifecycle_status": "eos",
                "operating_system_installation_date": "2020-10-15",
                "system_age_years": 99
            })
            .as_object()
            .unwrap()
            .clone(),
        );
        script().apply(&mut doc);
        assert_eq!(doc.source["risk_level"], "High");
        assert_eq!(doc.source["system_age_years"], 5);
        assert_eq!(doc.source["last_updated_timestamp"], 1_791_979_200_000i64);
        assert!(!doc.source.contains_key("transformation_timestamp"));
    }

    #[test]
    fn apply_drops_age_for_unknown_dates() {
        let mut doc = Document::from_value(json!({
            "operating_system_installation_date": "Unknown",
            "system_age_years": 4
        }));
        script().apply(&mut doc);
        assert!(!doc.source.contains_key("system_age_years"));
        assert_eq!(doc.source["risk_level"], "Low");
    }
}
