use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::AggregateId;

/// Version number of a stored document, used for optimistic concurrency.
///
/// A document that does not exist yet is at version 0; every save bumps
/// the version by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of a document that has never been saved.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// The stored state of one aggregate.
///
/// Documents are grouped by `table` (the aggregate type) and keyed by
/// aggregate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub table: String,
    pub key: AggregateId,
    pub version: Version,
    pub body: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserializes the body into a concrete state type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// Returns true if `value` contains `pattern`, with the semantics of
/// PostgreSQL's `jsonb @>` operator: objects match by subset of keys,
/// arrays match when every pattern element is contained in some element.
pub fn json_contains(value: &serde_json::Value, pattern: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (value, pattern) {
        (Value::Object(value), Value::Object(pattern)) => pattern
            .iter()
            .all(|(key, expected)| value.get(key).is_some_and(|v| json_contains(v, expected))),
        (Value::Array(value), Value::Array(pattern)) => pattern
            .iter()
            .all(|expected| value.iter().any(|v| json_contains(v, expected))),
        (Value::Array(value), scalar) if !scalar.is_object() => {
            value.iter().any(|v| v == scalar)
        }
        (value, pattern) => value == pattern,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn version_ordering() {
        assert!(Version::initial() < Version::initial().next());
        assert_eq!(Version::new(4).next(), Version::new(5));
    }

    #[test]
    fn containment_matches_nested_subsets() {
        let user = json!({
            "id": "u1",
            "role": {"role_id": "r1", "name": "Editor", "revision": 1},
            "tags": ["a", "b"]
        });

        assert!(json_contains(&user, &json!({"role": {"role_id": "r1"}})));
        assert!(json_contains(&user, &json!({"tags": ["b"]})));
        assert!(!json_contains(&user, &json!({"role": {"role_id": "r2"}})));
        assert!(!json_contains(&user, &json!({"department": {"department_id": "d1"}})));
    }

    #[test]
    fn containment_does_not_match_null_as_missing() {
        let user = json!({"role": null});
        assert!(!json_contains(&user, &json!({"role": {"role_id": "r1"}})));
    }
}
