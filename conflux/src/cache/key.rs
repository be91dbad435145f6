//! Cache key derivation.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Maps call arguments to the string that identifies them in the cache.
pub type KeyFunction = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// How the arguments of a call contribute to its cache key.
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// Every argument is part of the key.
    #[default]
    AllArguments,
    /// Only the named fields of an argument object are part of the key.
    ///
    /// Arguments that are not JSON objects are used whole.
    Fields(Vec<String>),
    /// A caller-supplied function over the raw arguments.
    Custom(KeyFunction),
}

impl std::fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllArguments => f.write_str("AllArguments"),
            Self::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Builds the cache key for `args` under `namespace`.
///
/// The arguments are canonicalized as JSON with sorted object keys before
/// hashing, so field order at the call site does not matter.
#[must_use]
pub fn derive_key(namespace: &str, args: &Value, strategy: &KeyStrategy) -> String {
    let material = match strategy {
        KeyStrategy::AllArguments => args.to_string(),
        KeyStrategy::Fields(fields) => select_fields(args, fields).to_string(),
        KeyStrategy::Custom(key_fn) => key_fn(args),
    };

    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(material.as_bytes());
    let digest = hasher.finalize();
    format!("{namespace}:{}", hex::encode(&digest[..16]))
}

fn select_fields(args: &Value, fields: &[String]) -> Value {
    let Some(object) = args.as_object() else {
        return args.clone();
    };
    let filtered: serde_json::Map<String, Value> = fields
        .iter()
        .filter_map(|field| object.get(field).map(|v| (field.clone(), v.clone())))
        .collect();
    Value::Object(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_deterministic_and_order_independent() {
        let a = derive_key("search", &json!({"q": "rust", "page": 2}), &KeyStrategy::AllArguments);
        let b = derive_key("search", &json!({"page": 2, "q": "rust"}), &KeyStrategy::AllArguments);
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
        assert_eq!(a.len(), "search:".len() + 32);
    }

    #[test]
    fn test_namespace_separates_functions() {
        let args = json!([1, 2]);
        assert_ne!(
            derive_key("add", &args, &KeyStrategy::AllArguments),
            derive_key("mul", &args, &KeyStrategy::AllArguments)
        );
    }

    #[test]
    fn test_fields_exclude_secrets() {
        let strategy = KeyStrategy::Fields(vec!["q".into()]);
        let a = derive_key("search", &json!({"q": "rust", "api_key": "one"}), &strategy);
        let b = derive_key("search", &json!({"q": "rust", "api_key": "two"}), &strategy);
        let c = derive_key("search", &json!({"q": "go", "api_key": "one"}), &strategy);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_custom_key_function() {
        let strategy = KeyStrategy::Custom(Arc::new(|args: &Value| {
            args["url"].as_str().unwrap_or_default().to_lowercase()
        }));
        let a = derive_key("fetch", &json!({"url": "HTTP://X"}), &strategy);
        let b = derive_key("fetch", &json!({"url": "http://x", "retries": 3}), &strategy);
        assert_eq!(a, b);
    }
}
