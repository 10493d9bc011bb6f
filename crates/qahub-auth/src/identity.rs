use serde::Serialize;
use serde_json::Value;

/// Decoded token claims: a string-keyed map of JSON values.
pub type Claims = serde_json::Map<String, Value>;

/// The authenticated principal of one RPC invocation or one stream.
///
/// Built by the token authority after successful validation and never
/// mutated afterwards; callers share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub principal_id: i64,
    pub username: String,
    /// The raw bearer token this identity was decoded from.
    #[serde(skip)]
    pub token: String,
    pub claims: Claims,
}

impl Identity {
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    pub fn has_claim(&self, key: &str) -> bool {
        self.claims.contains_key(key)
    }

    pub fn string_claim(&self, key: &str) -> Option<&str> {
        self.claim(key).and_then(Value::as_str)
    }

    /// Reads an integer claim. JSON numbers that decode as floating point
    /// (as every number in some JWT libraries does) are truncated.
    pub fn int64_claim(&self, key: &str) -> Option<i64> {
        self.claim(key).and_then(value_as_i64)
    }

    /// Unix second at which the token stops being valid.
    pub fn expires_at(&self) -> Option<i64> {
        self.int64_claim("exp")
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.int64_claim("iat")
    }
}

pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        _ => None,
    }
}
