//! Content fingerprints for cached stage outputs.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies one `(stage, input, module)` triple.
///
/// The short [`key`](Self::key) addresses the cache; the full
/// [`digest`](Self::digest) is stored alongside each entry so a key collision
/// is detected instead of returning someone else's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    key: String,
    digest: String,
}

impl Fingerprint {
    /// Computes the fingerprint of a stage input as served by a module.
    ///
    /// Object keys are sorted before hashing, so equal JSON values always
    /// produce equal fingerprints regardless of how they were built.
    #[must_use]
    pub fn compute(stage_id: &str, input: &Value, module_id: &str) -> Self {
        let mut canonical = String::new();
        write_canonical(
            &Value::Array(vec![
                Value::String(stage_id.to_string()),
                input.clone(),
                Value::String(module_id.to_string()),
            ]),
            &mut canonical,
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();

        Self {
            key: hex::encode(&result[..16]),
            digest: hex::encode(result),
        }
    }

    /// The short cache key (first 16 bytes of the digest, hex).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The full SHA-256 digest, hex.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Builds a fingerprint from raw parts, for collision tests.
    #[cfg(test)]
    pub(crate) fn from_raw(key: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            digest: digest.into(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, nested)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_shape() {
        let fp = Fingerprint::compute("summarize", &json!("hello"), "gpt-small");
        assert_eq!(fp.key().len(), 32);
        assert_eq!(fp.digest().len(), 64);
        assert!(fp.digest().starts_with(fp.key()));
        assert_eq!(fp.to_string(), fp.key());
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let mut forward = serde_json::Map::new();
        forward.insert("a".into(), json!(1));
        forward.insert("b".into(), json!({"y": 2, "x": [1, 2]}));
        let mut backward = serde_json::Map::new();
        backward.insert("b".into(), json!({"x": [1, 2], "y": 2}));
        backward.insert("a".into(), json!(1));

        assert_eq!(
            Fingerprint::compute("s", &Value::Object(forward), "m"),
            Fingerprint::compute("s", &Value::Object(backward), "m"),
        );
    }

    #[test]
    fn test_every_part_contributes() {
        let base = Fingerprint::compute("s", &json!("in"), "m");
        assert_ne!(base, Fingerprint::compute("t", &json!("in"), "m"));
        assert_ne!(base, Fingerprint::compute("s", &json!("out"), "m"));
        assert_ne!(base, Fingerprint::compute("s", &json!("in"), "n"));
        // Array order is meaningful.
        assert_ne!(
            Fingerprint::compute("s", &json!([1, 2]), "m"),
            Fingerprint::compute("s", &json!([2, 1]), "m"),
        );
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        assert_ne!(
            Fingerprint::compute("ab", &json!("c"), "m"),
            Fingerprint::compute("a", &json!("bc"), "m"),
        );
    }
}
