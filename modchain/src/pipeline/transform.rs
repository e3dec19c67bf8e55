//! Edge transformers between data kinds.
//!
//! When a stage declares an input kind that differs from what the previous
//! stage produced, the executor adapts the payload through a transformer
//! registered for that `(from, to)` pair.

use crate::core::DataKind;
use crate::errors::TransformError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Converts a payload from one kind to another.
pub trait Transformer: Send + Sync {
    /// Transforms one payload.
    fn transform(&self, value: &Value) -> Result<Value, TransformError>;
}

impl<F> Transformer for F
where
    F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync,
{
    fn transform(&self, value: &Value) -> Result<Value, TransformError> {
        self(value)
    }
}

/// Transformers keyed by `(from, to)`.
#[derive(Clone)]
pub struct TransformerRegistry {
    transformers: HashMap<(DataKind, DataKind), Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Creates a registry without any transformer.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in transformers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(DataKind::Data, DataKind::Text, data_to_text);
        registry.register(DataKind::Text, DataKind::Data, text_to_data);
        registry.register(DataKind::Image, DataKind::Text, image_to_text);
        registry
    }

    /// Registers (or replaces) the transformer for an edge.
    pub fn register<T>(&mut self, from: DataKind, to: DataKind, transformer: T)
    where
        T: Transformer + 'static,
    {
        self.transformers.insert((from, to), Arc::new(transformer));
    }

    /// Returns true if the edge needs no transformer or has one.
    #[must_use]
    pub fn supports(&self, from: DataKind, to: DataKind) -> bool {
        from.is_compatible_with(to) || self.transformers.contains_key(&(from, to))
    }

    /// Adapts a payload of kind `from` to kind `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if no transformer is registered for a mismatched
    /// edge, or if the transformer rejects the payload.
    pub fn adapt(&self, value: &Value, from: DataKind, to: DataKind) -> Result<Value, TransformError> {
        if from.is_compatible_with(to) {
            return Ok(value.clone());
        }

        self.transformers
            .get(&(from, to))
            .ok_or_else(|| TransformError::new(format!("no transformer from {from} to {to}")))?
            .transform(value)
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut edges: Vec<_> = self
            .transformers
            .keys()
            .map(|(from, to)| format!("{from}->{to}"))
            .collect();
        edges.sort();
        f.debug_struct("TransformerRegistry")
            .field("edges", &edges)
            .finish()
    }
}

fn data_to_text(value: &Value) -> Result<Value, TransformError> {
    match value {
        Value::String(_) => Ok(value.clone()),
        other => serde_json::to_string(other)
            .map(Value::String)
            .map_err(|e| TransformError::new(e.to_string())),
    }
}

fn text_to_data(value: &Value) -> Result<Value, TransformError> {
    match value {
        Value::String(text) => Ok(json!({ "text": text })),
        other => Err(TransformError::new(format!(
            "expected text, got {}",
            json_type(other)
        ))),
    }
}

fn image_to_text(value: &Value) -> Result<Value, TransformError> {
    let (bytes, mime) = match value {
        Value::String(uri) if uri.starts_with("data:") => return Ok(value.clone()),
        Value::Array(items) => (byte_array(items)?, "application/octet-stream"),
        Value::Object(map) => {
            let items = map
                .get("bytes")
                .and_then(Value::as_array)
                .ok_or_else(|| TransformError::new("image object has no 'bytes' array"))?;
            let mime = map
                .get("mime")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream");
            (byte_array(items)?, mime)
        }
        other => {
            return Err(TransformError::new(format!(
                "expected image bytes, got {}",
                json_type(other)
            )))
        }
    };

    Ok(Value::String(format!(
        "data:{mime};base64,{}",
        STANDARD.encode(bytes)
    )))
}

fn byte_array(items: &[Value]) -> Result<Vec<u8>, TransformError> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| TransformError::new(format!("invalid byte value {item}")))
        })
        .collect()
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatible_edges_pass_through() {
        let registry = TransformerRegistry::empty();
        let value = json!({"a": 1});
        assert_eq!(registry.adapt(&value, DataKind::Data, DataKind::Data).unwrap(), value);
        assert_eq!(registry.adapt(&value, DataKind::Any, DataKind::Text).unwrap(), value);
        assert_eq!(registry.adapt(&value, DataKind::Image, DataKind::Any).unwrap(), value);
    }

    #[test]
    fn test_missing_transformer_fails() {
        let registry = TransformerRegistry::with_builtins();
        let err = registry
            .adapt(&json!("x"), DataKind::Audio, DataKind::Text)
            .unwrap_err();
        assert_eq!(err.to_string(), "no transformer from audio to text");
        assert!(!registry.supports(DataKind::Audio, DataKind::Text));
    }

    #[test]
    fn test_data_text_round() {
        let registry = TransformerRegistry::default();
        let text = registry
            .adapt(&json!({"k": [1, 2]}), DataKind::Data, DataKind::Text)
            .unwrap();
        assert_eq!(text, json!(r#"{"k":[1,2]}"#));

        let data = registry
            .adapt(&json!("hello"), DataKind::Text, DataKind::Data)
            .unwrap();
        assert_eq!(data, json!({"text": "hello"}));
        assert!(registry
            .adapt(&json!(3), DataKind::Text, DataKind::Data)
            .is_err());
    }

    #[test]
    fn test_image_to_data_uri() {
        let registry = TransformerRegistry::default();

        let raw = registry
            .adapt(&json!([104, 105]), DataKind::Image, DataKind::Text)
            .unwrap();
        assert_eq!(raw, json!("data:application/octet-stream;base64,aGk="));

        let tagged = registry
            .adapt(
                &json!({"bytes": [104, 105], "mime": "image/png"}),
                DataKind::Image,
                DataKind::Text,
            )
            .unwrap();
        assert_eq!(tagged, json!("data:image/png;base64,aGk="));

        assert!(registry
            .adapt(&json!([300]), DataKind::Image, DataKind::Text)
            .is_err());
    }

    #[test]
    fn test_custom_transformer() {
        let mut registry = TransformerRegistry::empty();
        registry.register(DataKind::Audio, DataKind::Text, |_: &Value| {
            Ok(json!("transcript"))
        });
        assert_eq!(
            registry.adapt(&json!([0]), DataKind::Audio, DataKind::Text).unwrap(),
            json!("transcript")
        );
    }
}
