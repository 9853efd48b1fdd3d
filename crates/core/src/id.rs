//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an aggregate root (event stream key).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

/// Identifier of a supplier (owned by the purchasing side of the application).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(AggregateId, "AggregateId");
impl_uuid_newtype!(SupplierId, "SupplierId");

/// Identifier of a stock batch, unique within its product.
///
/// Batch ids reach us in several shapes: native UUIDs, plain strings,
/// document-store wrappers (`{"$oid": "..."}`) and legacy integer keys from the
/// relational schema. All of them are reduced to a single canonical string at
/// the boundary:
///
/// - surrounding whitespace is trimmed,
/// - UUIDs are rendered in lowercase "simple" form (no hyphens),
/// - 24-digit hex ObjectIds are lowercased,
/// - anything else is kept verbatim (legacy lot codes are case-sensitive).
///
/// Internal code compares `BatchId`s directly and never sees the raw shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Allocate a fresh identifier (UUIDv7, simple form).
    pub fn generate() -> Self {
        Self::from(Uuid::now_v7())
    }

    /// Canonicalize a textual identifier.
    pub fn normalize(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("BatchId: empty"));
        }

        if let Ok(uuid) = Uuid::from_str(trimmed) {
            return Ok(Self::from(uuid));
        }

        if is_object_id(trimmed) {
            return Ok(Self(trimmed.to_ascii_lowercase()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Canonicalize an identifier taken from a JSON document.
    ///
    /// Accepts a string, a non-negative integer, or an object of the form
    /// `{"$oid": "<string>"}`.
    pub fn from_json(value: &JsonValue) -> Result<Self, DomainError> {
        match value {
            JsonValue::String(s) => Self::normalize(s),
            JsonValue::Number(n) => match n.as_u64() {
                Some(v) => Self::normalize(&v.to_string()),
                None => Err(DomainError::invalid_id(format!(
                    "BatchId: numeric id must be a non-negative integer, got {n}"
                ))),
            },
            JsonValue::Object(map) => match map.get("$oid") {
                Some(JsonValue::String(s)) if map.len() == 1 => Self::normalize(s),
                _ => Err(DomainError::invalid_id(
                    "BatchId: object form must be {\"$oid\": <string>}",
                )),
            },
            other => Err(DomainError::invalid_id(format!(
                "BatchId: unsupported representation {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_object_id(raw: &str) -> bool {
    raw.len() == 24 && raw.bytes().all(|b| b.is_ascii_hexdigit())
}

impl From<Uuid> for BatchId {
    fn from(value: Uuid) -> Self {
        Self(value.simple().to_string())
    }
}

impl FromStr for BatchId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BatchId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = JsonValue::deserialize(deserializer)?;
        BatchId::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uuid_forms_collapse_to_one_canonical_id() {
        let uuid = Uuid::parse_str("0190a3c2-7b1e-7cde-8f00-1234567890ab").unwrap();
        let native = BatchId::from(uuid);
        let hyphenated = BatchId::normalize("0190A3C2-7B1E-7CDE-8F00-1234567890AB").unwrap();
        let simple = BatchId::normalize(" 0190a3c27b1e7cde8f001234567890ab ").unwrap();

        assert_eq!(native, hyphenated);
        assert_eq!(native, simple);
        assert_eq!(native.as_str(), "0190a3c27b1e7cde8f001234567890ab");
    }

    #[test]
    fn document_store_wrapper_is_unwrapped() {
        let wrapped = BatchId::from_json(&json!({"$oid": "65F1A2B3C4D5E6F708192A3B"})).unwrap();
        let plain = BatchId::from_json(&json!("65f1a2b3c4d5e6f708192a3b")).unwrap();
        assert_eq!(wrapped, plain);
    }

    #[test]
    fn legacy_integer_ids_are_accepted() {
        let id = BatchId::from_json(&json!(42)).unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(id, BatchId::normalize("42").unwrap());
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(BatchId::normalize("   ").is_err());
        assert!(BatchId::from_json(&json!(-3)).is_err());
        assert!(BatchId::from_json(&json!(null)).is_err());
        assert!(BatchId::from_json(&json!({"$oid": 5})).is_err());
        assert!(BatchId::from_json(&json!({"$oid": "ab", "extra": 1})).is_err());
    }

    #[test]
    fn deserializes_from_every_shape() {
        let a: BatchId = serde_json::from_value(json!({"$oid": "65F1A2B3C4D5E6F708192A3B"})).unwrap();
        let b: BatchId = serde_json::from_value(json!("65f1a2b3c4d5e6f708192a3b")).unwrap();
        assert_eq!(a, b);

        let serialized = serde_json::to_value(&a).unwrap();
        assert_eq!(serialized, json!("65f1a2b3c4d5e6f708192a3b"));
    }

    #[test]
    fn legacy_lot_codes_are_opaque() {
        let id = BatchId::normalize("  LOT/24.01 ").unwrap();
        assert_eq!(id.as_str(), "LOT/24.01");
        assert_eq!(id, BatchId::from_json(&json!({"$oid": "LOT/24.01"})).unwrap());

        // Case is significant outside the hex forms.
        assert_ne!(BatchId::normalize("Lot-A").unwrap(), BatchId::normalize("lot-a").unwrap());
    }

    #[test]
    fn aggregate_id_parses_and_displays() {
        let id = AggregateId::new();
        let parsed: AggregateId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<AggregateId>().is_err());
    }
}
