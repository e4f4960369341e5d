//! Strong type definitions for tillsync.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Identifier of a pending operation.
///
/// Freshly generated ids are 128 random bits rendered as lowercase hex.
/// Any non-empty string is accepted when reading back, so ids assigned by
/// other clients (UUIDs, for example) survive a round trip unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    /// Wrap an existing identifier. Fails if it is empty or only whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Render 16 raw bytes as an identifier.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Generate a random identifier.
    pub fn random() -> Self {
        Self::from_bytes(rand::random())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperationId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_hex_and_distinct() {
        let a = OperationId::random();
        let b = OperationId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(OperationId::new("").is_err());
        assert!(OperationId::new("   ").is_err());
        assert!(OperationId::new("4f1c-legacy").is_ok());
    }

    #[test]
    fn test_serde_rejects_empty_id() {
        let ok: OperationId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<OperationId>("\"\"").is_err());
    }

    #[test]
    fn test_display() {
        let id = OperationId::from_bytes([0xab; 16]);
        assert_eq!(format!("{}", id), "abababababababababababababababab");
        assert!(format!("{:?}", id).starts_with("OperationId("));
    }
}
