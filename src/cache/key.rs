//! Deterministic request fingerprints.
//!
//! A key is the SHA-256 of a canonical JSON rendering of
//! `(provider, endpoint, payload, context)`. Object keys are sorted during
//! rendering so the fingerprint does not depend on map insertion order,
//! and it is stable across processes (the persistent tier relies on that).

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the cache key for a provider call.
///
/// `payload` must contain every field that affects the generated output
/// (model, prompt, sampling parameters); `context` carries anything that
/// shaped the payload but is not visible in it.
pub fn fingerprint(provider: &str, endpoint: &str, payload: &Value, context: Option<&Value>) -> String {
    let mut canonical = String::new();
    canonical.push('[');
    write_canonical(&Value::String(provider.to_string()), &mut canonical);
    canonical.push(',');
    write_canonical(&Value::String(endpoint.to_string()), &mut canonical);
    canonical.push(',');
    write_canonical(payload, &mut canonical);
    canonical.push(',');
    write_canonical(context.unwrap_or(&Value::Null), &mut canonical);
    canonical.push(']');

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String(k.clone()), out);
                out.push(':');
                write_canonical(v, out);
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
        // scalars: serde_json's rendering is already canonical
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_deterministic() {
        let payload = json!({"model": "gpt-4o", "max_tokens": 50});
        let k1 = fingerprint("openai", "generate", &payload, None);
        let k2 = fingerprint("openai", "generate", &payload, None);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let mut a = serde_json::Map::new();
        a.insert("temperature".into(), json!(0.7));
        a.insert("model".into(), json!("m"));
        let mut b = serde_json::Map::new();
        b.insert("model".into(), json!("m"));
        b.insert("temperature".into(), json!(0.7));
        assert_eq!(
            fingerprint("p", "e", &Value::Object(a), None),
            fingerprint("p", "e", &Value::Object(b), None)
        );
    }

    #[test]
    fn fingerprint_differs_on_provider() {
        let payload = json!({"prompt": "hi"});
        assert_ne!(
            fingerprint("openai", "generate", &payload, None),
            fingerprint("anthropic", "generate", &payload, None)
        );
    }

    #[test]
    fn fingerprint_differs_on_endpoint() {
        let payload = json!({"prompt": "hi"});
        assert_ne!(
            fingerprint("openai", "generate", &payload, None),
            fingerprint("openai", "chat", &payload, None)
        );
    }

    #[test]
    fn fingerprint_differs_on_nested_value() {
        let a = json!({"messages": [{"role": "user", "content": "a"}]});
        let b = json!({"messages": [{"role": "user", "content": "b"}]});
        assert_ne!(
            fingerprint("p", "e", &a, None),
            fingerprint("p", "e", &b, None)
        );
    }

    #[test]
    fn fingerprint_differs_on_context() {
        let payload = json!({"prompt": "hi"});
        let ctx = json!({"project": "demo"});
        assert_ne!(
            fingerprint("p", "e", &payload, None),
            fingerprint("p", "e", &payload, Some(&ctx))
        );
    }

    #[test]
    fn provider_and_endpoint_are_not_ambiguous() {
        // naive concatenation would make these collide
        let payload = json!(null);
        assert_ne!(
            fingerprint("ab", "c", &payload, None),
            fingerprint("a", "bc", &payload, None)
        );
    }
}
