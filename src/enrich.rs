//! Derived-field computation and the client-side validity predicate.
//!
//! Everything here is a pure function of a document's own source fields and
//! the instant passed in. Malformed inputs never raise: an unparsable install
//! date omits `system_age_years` and an unrecognised status classifies as
//! [`RiskLevel::Low`].
//!
//! The same rules are rendered into the store's scripting language by
//! [`crate::script`]; the two must stay in lockstep.

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;

use crate::models::{
    Document, RiskLevel, HOSTNAME, INSTALLATION_DATE, LIFECYCLE_STATUS, RISK_LEVEL,
    SYSTEM_AGE_YEARS, TRANSFORMATION_TIMESTAMP,
};

/// Classify a lifecycle status: `EOL`/`EOS` (trimmed, any case) are high risk.
///
/// Trimming strips every char up to U+0020, control chars included, and
/// nothing else, the same as `String.trim()` in the store script.
pub fn risk_level(status: Option<&str>) -> RiskLevel {
    match status.map(|s| s.trim_matches(|c: char| c <= ' ').to_uppercase()) {
        Some(s) if s == "EOL" || s == "EOS" => RiskLevel::High,
        _ => RiskLevel::Low,
    }
}

/// Parse a strict `YYYY-MM-DD` date.
///
/// Single-digit months or days, surrounding whitespace and trailing
/// characters are rejected so the result matches `LocalDate.parse` on the
/// store side.
pub fn parse_install_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !digits_ok {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Completed years between `installed` and `today`, never negative.
pub fn completed_years(installed: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - installed.year();
    if (today.month(), today.day()) < (installed.month(), installed.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Age of a system in completed years, or `None` when the install date is
/// absent, "Unknown" or unparsable.
pub fn system_age_years(install_date: Option<&str>, today: NaiveDate) -> Option<u32> {
    let raw = install_date?;
    if raw.eq_ignore_ascii_case("unknown") {
        return None;
    }
    parse_install_date(raw).map(|installed| completed_years(installed, today))
}

/// A document is valid when its hostname is present, non-blank and not
/// "unknown" in any case.
///
/// The server-side delete predicate in [`crate::delete`] is deliberately
/// narrower (exact "Unknown" only).
pub fn is_valid(doc: &Document) -> bool {
    match doc.text_field(HOSTNAME) {
        Some(hostname) => {
            let hostname = hostname.trim();
            !hostname.is_empty() && !hostname.eq_ignore_ascii_case("unknown")
        }
        None => false,
    }
}

/// The derived values for one document at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub risk_level: RiskLevel,
    pub system_age_years: Option<u32>,
}

pub fn derive(doc: &Document, today: NaiveDate) -> Derived {
    let status = doc.text_field(LIFECYCLE_STATUS);
    let install_date = doc.text_field(INSTALLATION_DATE);
    Derived {
        risk_level: risk_level(status.as_deref()),
        system_age_years: system_age_years(install_date.as_deref(), today),
    }
}

/// Write `risk_level` and `system_age_years` into `doc`.
///
/// An incomputable age removes any previous `system_age_years` so the field
/// never outlives the source value it was derived from.
pub fn apply_derived(doc: &mut Document, derived: Derived) {
    doc.source.insert(
        RISK_LEVEL.to_string(),
        Value::String(derived.risk_level.as_str().to_string()),
    );
    match derived.system_age_years {
        Some(age) => {
            doc.source
                .insert(SYSTEM_AGE_YEARS.to_string(), Value::from(age));
        }
        None => {
            doc.source.remove(SYSTEM_AGE_YEARS);
        }
    }
}

/// Enrich a copy of `doc` as of `now`.
///
/// Appends `risk_level`, `system_age_years` (when computable) and
/// `transformation_timestamp`. The original fields are left untouched.
pub fn enrich(doc: &Document, now: DateTime<Utc>) -> Document {
    let mut out = doc.clone();
    apply_derived(&mut out, derive(doc, now.date_naive()));
    out.source.insert(
        TRANSFORMATION_TIMESTAMP.to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Months, TimeZone};
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    #[test]
    fn status_trim_follows_script_trim() {
        // control chars are trimmed, non-breaking space is not
        assert_eq!(risk_level(Some("EOL\u{1}")), RiskLevel::High);
        assert_eq!(risk_level(Some("\u{0}EOS\r\n")), RiskLevel::High);
        assert_eq!(risk_level(Some("EOL\u{a0}")), RiskLevel::Low);
        assert_eq!(risk_level(Some("\u{2003}EOS")), RiskLevel::Low);
    }

    #[test]
    fn eol_and_eos_are_high() {
        for status in ["EOL", "eol", " Eos ", "EOS\t"] {
            assert_eq!(risk_level(Some(status)), RiskLevel::High, "{status:?}");
        }
    }

    #[test]
    fn other_statuses_are_low() {
        assert_eq!(risk_level(None), RiskLevel::Low);
        for status in ["", "Active", "EOLX", "Supported"] {
            assert_eq!(risk_level(Some(status)), RiskLevel::Low, "{status:?}");
        }
    }

    #[test]
    fn installed_today_is_zero() {
        let date = today().format("%Y-%m-%d").to_string();
        assert_eq!(system_age_years(Some(&date), today()), Some(0));
    }

    #[test]
    fn three_years_minus_a_day_is_two() {
        let installed = today().checked_sub_months(Months::new(36)).unwrap() + chrono::Days::new(1);
        let date = installed.format("%Y-%m-%d").to_string();
        assert_eq!(system_age_years(Some(&date), today()), Some(2));

        let exactly_three = today().checked_sub_months(Months::new(36)).unwrap();
        let date = exactly_three.format("%Y-%m-%d").to_string();
        assert_eq!(system_age_years(Some(&date), today()), Some(3));
    }

    #[test]
    fn future_install_date_clamps_to_zero() {
        assert_eq!(system_age_years(Some("2030-01-01"), today()), Some(0));
    }

    #[test]
    fn leap_day_install_counts_on_march_first() {
        let installed = "2020-02-29";
        let feb_28 = NaiveDate::from_ymd_opt(2021, 2, 28).unwrap();
        let mar_1 = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        assert_eq!(system_age_years(Some(installed), feb_28), Some(0));
        assert_eq!(system_age_years(Some(installed), mar_1), Some(1));
    }

    #[test]
    fn unknown_or_malformed_dates_are_omitted() {
        for raw in ["Unknown", "unknown", "", "2020/01/01", "2020-1-5", " 2020-01-01", "2021-02-30", "not a date"] {
            assert_eq!(system_age_years(Some(raw), today()), None, "{raw:?}");
        }
        assert_eq!(system_age_years(None, today()), None);
    }

    #[test]
    fn validity_predicate() {
        let valid = |v: serde_json::Value| is_valid(&Document::from_value(v));
        assert!(valid(json!({"hostname": "host1"})));
        assert!(!valid(json!({"hostname": ""})));
        assert!(!valid(json!({"hostname": "   "})));
        assert!(!valid(json!({"hostname": "Unknown"})));
        assert!(!valid(json!({"hostname": "unknown"})));
        assert!(!valid(json!({"hostname": "UNKNOWN"})));
        assert!(!valid(json!({"hostname": null})));
        assert!(!valid(json!({"os": "linux"})));
    }

    #[test]
    fn enrich_appends_derived_fields() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 30, 0).unwrap();
        let doc = Document::with_id(
            "a1",
            json!({
                "hostname": "web-01",
                "operating_system_lifecycle_status": "EOL",
                "operating_system_installation_date": "2019-06-01"
            })
            .as_object()
            .unwrap()
            .clone(),
        );

        let out = enrich(&doc, now);
        assert_eq!(out.source["hostname"], "web-01");
        assert_eq!(out.source["risk_level"], "High");
        assert_eq!(out.source["system_age_years"], 7);
        assert_eq!(out.source["transformation_timestamp"], "2026-10-14T08:30:00.000Z");
        assert_eq!(out.id.as_deref(), Some("a1"));
        // input untouched
        assert!(!doc.source.contains_key("risk_level"));
    }

    #[test]
    fn enrich_omits_age_instead_of_null() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 0, 0, 0).unwrap();
        let doc = Document::from_value(json!({
            "hostname": "db-02",
            "operating_system_installation_date": "Unknown"
        }));
        let out = enrich(&doc, now);
        assert!(!out.source.contains_key("system_age_years"));
        assert_eq!(out.source["risk_level"], "Low");
    }

    #[test]
    fn apply_derived_removes_stale_age() {
        let mut doc = Document::from_value(json!({"system_age_years": 9}));
        apply_derived(
            &mut doc,
            Derived {
                risk_level: RiskLevel::Low,
                system_age_years: None,
            },
        );
        assert!(!doc.source.contains_key("system_age_years"));
    }
}
