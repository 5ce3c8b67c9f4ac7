//! Canonical key derivation from request attributes (spec §4.1).
//!
//! Two requests with the same logical query must produce identical
//! fingerprints regardless of attribute order or field-name casing; two
//! requests differing in any value must produce different ones.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const NAMESPACE: &str = "pricing";

/// A single attribute record as received from a caller. Field names may
/// arrive in any casing style; unrecognized fields are ignored.
pub type AttributeRecord = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct CanonicalRecord {
    period: Option<String>,
    hotel: Option<String>,
    room: Option<String>,
}

impl CanonicalRecord {
    fn from_raw(raw: &AttributeRecord) -> Self {
        Self {
            period: lookup(raw, "period"),
            hotel: lookup(raw, "hotel"),
            room: lookup(raw, "room"),
        }
    }

    /// Concatenation of the present values, used both as the sort key and
    /// as a building block of the canonical serialized form.
    fn sort_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.period.as_deref().unwrap_or(""),
            self.hotel.as_deref().unwrap_or(""),
            self.room.as_deref().unwrap_or(""),
        )
    }
}

/// Looks up a field under any casing of its name (matched
/// case-insensitively), optionally prefixed with a leading `:`
/// symbol-style marker as seen in dynamically-typed upstream payloads.
/// Missing fields are dropped, never defaulted.
fn lookup(raw: &AttributeRecord, field: &str) -> Option<String> {
    for (key, value) in raw {
        let normalized = key.strip_prefix(':').unwrap_or(key);
        if normalized.eq_ignore_ascii_case(field) {
            return value.as_str().map(str::to_string).or_else(|| {
                // Non-string scalars (numbers, bools) still serialize
                // deterministically; anything else (objects, null) is
                // treated as absent.
                match value {
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    serde_json::Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                }
            });
        }
    }
    None
}

/// A stable, namespaced hash over a canonicalized attribute sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Sentinel for empty or non-sequence input; the adapter short-circuits
    /// on this before ever touching the cache.
    pub const EMPTY: &'static str = "pricing:empty";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.0 == Self::EMPTY
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes the fingerprint for a sequence of attribute records.
///
/// Empty input yields [`Fingerprint::EMPTY`].
pub fn fingerprint(attrs: &[AttributeRecord]) -> Fingerprint {
    if attrs.is_empty() {
        return Fingerprint(Fingerprint::EMPTY.to_string());
    }

    let mut canonical: Vec<CanonicalRecord> = attrs.iter().map(CanonicalRecord::from_raw).collect();
    canonical.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let serialized =
        serde_json::to_string(&canonical).expect("canonical records always serialize");

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let digest = hasher.finalize();

    Fingerprint(format!("{NAMESPACE}:{}", hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(period: &str, hotel: &str, room: &str) -> AttributeRecord {
        BTreeMap::from([
            ("period".to_string(), json!(period)),
            ("hotel".to_string(), json!(hotel)),
            ("room".to_string(), json!(room)),
        ])
    }

    #[test]
    fn empty_input_yields_sentinel() {
        let fp = fingerprint(&[]);
        assert!(fp.is_empty_sentinel());
    }

    #[test]
    fn identical_attributes_produce_identical_fingerprints() {
        let a = fingerprint(&[record("Summer", "FloatingPointResort", "SingletonRoom")]);
        let b = fingerprint(&[record("Summer", "FloatingPointResort", "SingletonRoom")]);
        assert_eq!(a, b);
    }

    #[test]
    fn attribute_order_does_not_affect_fingerprint() {
        let a = fingerprint(&[
            record("Summer", "H", "R"),
            record("Winter", "H", "R"),
        ]);
        let b = fingerprint(&[
            record("Winter", "H", "R"),
            record("Summer", "H", "R"),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn differing_values_produce_different_fingerprints() {
        let a = fingerprint(&[record("Summer", "H", "R")]);
        let b = fingerprint(&[record("Winter", "H", "R")]);
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut raw = record("Summer", "H", "R");
        raw.insert("currency".to_string(), json!("USD"));
        let a = fingerprint(&[raw]);
        let b = fingerprint(&[record("Summer", "H", "R")]);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_fields_are_dropped_not_defaulted() {
        let mut raw = record("Summer", "H", "R");
        raw.remove("room");
        let with_missing = fingerprint(&[raw]);

        let mut other = record("Summer", "H", "R");
        other.insert("room".to_string(), json!(""));
        let with_empty_string = fingerprint(&[other]);

        // A dropped field canonicalizes to `room: None` (serializes as
        // `null`); an explicit empty string canonicalizes to `room:
        // Some("")` (serializes as `""`). Different serialized forms,
        // different digests.
        assert_ne!(with_missing, with_empty_string);
    }

    #[test]
    fn field_name_casing_variants_match() {
        let raw = BTreeMap::from([
            ("PERIOD".to_string(), json!("Summer")),
            ("Hotel".to_string(), json!("H")),
            ("room".to_string(), json!("R")),
        ]);
        let a = fingerprint(&[raw]);
        let b = fingerprint(&[record("Summer", "H", "R")]);
        assert_eq!(a, b);
    }
}
