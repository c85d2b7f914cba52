//! Outbound payload size bounding.
//!
//! Binary content (images, attachments) belongs in the media blob store and
//! should be referenced by URL. When a bucket nevertheless carries inline
//! `data:...;base64,...` payloads and its serialized form reaches the limit,
//! [`normalize`] strips those payloads so that what goes over the wire stays
//! bounded.
//!
//! ```
//! use bucket_sync::normalize::{normalize, Normalized};
//!
//! let small = r#"{"logo":"data:image/png;base64,AAAA"}"#;
//! assert_eq!(normalize(small, 1024), Normalized::Unchanged);
//!
//! match normalize(small, 8) {
//!     Normalized::Stripped { value, removed } => {
//!         assert_eq!(value, r#"{"logo":""}"#);
//!         assert_eq!(removed, 1);
//!     }
//!     Normalized::Unchanged => unreachable!(),
//! }
//! ```

use serde_json::Value;
use tracing::{debug, warn};

/// Serialized size at which a bucket gets normalized: 2 MiB.
pub const DEFAULT_PAYLOAD_LIMIT: usize = 2 * 1024 * 1024;

/// Outcome of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Below the limit, unparseable, or nothing to strip: send as is.
    Unchanged,
    /// Embedded binaries were removed.
    Stripped {
        /// Re-serialized document.
        value: String,
        /// Number of payloads blanked or dropped.
        removed: usize,
    },
}

impl Normalized {
    /// The value to transmit, falling back to the original input.
    pub fn into_value(self, original: String) -> String {
        match self {
            Self::Unchanged => original,
            Self::Stripped { value, .. } => value,
        }
    }
}

/// Bound the size of one serialized bucket.
///
/// Values shorter than `limit` bytes pass through. Larger ones are parsed,
/// every embedded binary string is replaced by `""`, array slots that held
/// one are dropped, and the document is re-serialized.
pub fn normalize(raw: &str, limit: usize) -> Normalized {
    if raw.len() < limit {
        return Normalized::Unchanged;
    }

    let mut doc: Value = match serde_json::from_str(raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(len = raw.len(), error = %e, "oversized bucket is not valid JSON, sending as is");
            return Normalized::Unchanged;
        }
    };

    let removed = strip(&mut doc);
    if removed == 0 {
        debug!(len = raw.len(), "oversized bucket has no embedded binaries");
        return Normalized::Unchanged;
    }

    match serde_json::to_string(&doc) {
        Ok(value) => {
            debug!(before = raw.len(), after = value.len(), removed, "stripped embedded binaries");
            Normalized::Stripped { value, removed }
        }
        Err(e) => {
            warn!(error = %e, "failed to re-serialize normalized bucket");
            Normalized::Unchanged
        }
    }
}

/// `true` for inline binary payloads such as `data:image/png;base64,....`.
pub fn is_embedded_binary(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("data:") else {
        return false;
    };
    match rest.split_once(',') {
        Some((header, _)) => header.split(';').any(|part| part == "base64"),
        None => false,
    }
}

fn strip(value: &mut Value) -> usize {
    match value {
        Value::String(s) if is_embedded_binary(s) => {
            s.clear();
            1
        }
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| !matches!(item, Value::String(s) if is_embedded_binary(s)));
            let dropped = before - items.len();
            dropped + items.iter_mut().map(strip).sum::<usize>()
        }
        Value::Object(map) => map.values_mut().map(strip).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob(len: usize) -> String {
        format!("data:image/jpeg;base64,{}", "A".repeat(len))
    }

    #[test]
    fn detects_base64_data_uris_only() {
        assert!(is_embedded_binary("data:image/png;base64,iVBOR"));
        assert!(is_embedded_binary("data:application/octet-stream;name=x;base64,AA"));
        assert!(!is_embedded_binary("data:text/plain,hello"));
        assert!(!is_embedded_binary("https://cdn.example.com/a.png"));
        assert!(!is_embedded_binary("data:"));
    }

    #[test]
    fn below_limit_passes_through() {
        let raw = json!({"photo": blob(10)}).to_string();
        assert_eq!(normalize(&raw, raw.len() + 1), Normalized::Unchanged);
    }

    #[test]
    fn five_megabyte_value_normalizes_under_limit() {
        let raw = json!({
            "name": "Finals",
            "teams": [{"name": "Reds", "logo": blob(5 * 1024 * 1024)}],
        })
        .to_string();
        assert!(raw.len() > 5 * 1024 * 1024);

        let Normalized::Stripped { value, removed } = normalize(&raw, DEFAULT_PAYLOAD_LIMIT) else {
            panic!("expected stripping");
        };
        assert!(value.len() < DEFAULT_PAYLOAD_LIMIT);
        assert_eq!(removed, 1);

        let doc: Value = serde_json::from_str(&value).unwrap();
        assert_eq!(doc["teams"][0]["logo"], "");
        assert_eq!(doc["name"], "Finals");
    }

    #[test]
    fn array_slots_holding_binaries_are_dropped() {
        let raw = json!({"gallery": [blob(64), "https://x/y.png", blob(64)], "keep": ["", 1]})
            .to_string();
        let Normalized::Stripped { value, removed } = normalize(&raw, 16) else {
            panic!("expected stripping");
        };
        assert_eq!(removed, 2);
        let doc: Value = serde_json::from_str(&value).unwrap();
        assert_eq!(doc["gallery"], json!(["https://x/y.png"]));
        // Pre-existing empty strings are user data.
        assert_eq!(doc["keep"], json!(["", 1]));
    }

    #[test]
    fn oversized_without_binaries_is_unchanged() {
        let raw = json!({"notes": "x".repeat(100)}).to_string();
        assert_eq!(normalize(&raw, 10), Normalized::Unchanged);
    }

    #[test]
    fn oversized_garbage_is_unchanged() {
        assert_eq!(normalize("{not json", 2), Normalized::Unchanged);
    }

    #[test]
    fn into_value_prefers_stripped() {
        let original = "orig".to_string();
        assert_eq!(Normalized::Unchanged.into_value(original.clone()), "orig");
        let stripped = Normalized::Stripped {
            value: "new".into(),
            removed: 1,
        };
        assert_eq!(stripped.into_value(original), "new");
    }
}
