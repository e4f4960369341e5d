//! Timestamp decoding for stored operations.
//!
//! Timestamps are written as Unix milliseconds. Queues written by older
//! clients carry RFC 3339 strings instead, so reading accepts both.

use chrono::DateTime;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    fn into_millis(self) -> Result<i64, String> {
        match self {
            Self::Millis(ms) => Ok(ms),
            Self::Float(ms) if ms.is_finite() => Ok(ms as i64),
            Self::Float(ms) => Err(format!("invalid timestamp {ms}")),
            Self::Text(text) => parse_millis(&text),
        }
    }
}

/// Parse an RFC 3339 string, or a decimal millisecond count, into Unix ms.
pub fn parse_millis(text: &str) -> Result<i64, String> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("invalid timestamp {text:?}: {e}"))
}

/// `deserialize_with` for a required timestamp.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    RawTimestamp::deserialize(deserializer)?
        .into_millis()
        .map_err(serde::de::Error::custom)
}

/// `deserialize_with` for an optional timestamp. `null` reads as `None`.
pub fn deserialize_option<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(RawTimestamp::into_millis)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Stamped {
        #[serde(deserialize_with = "deserialize")]
        at: i64,
        #[serde(default, deserialize_with = "deserialize_option")]
        maybe: Option<i64>,
    }

    #[test]
    fn test_accepts_millis_and_rfc3339() {
        let a: Stamped = serde_json::from_str(r#"{"at": 1735689600000}"#).unwrap();
        assert_eq!(a.at, 1_735_689_600_000);
        assert_eq!(a.maybe, None);

        let b: Stamped =
            serde_json::from_str(r#"{"at": "2025-01-01T00:00:00.000Z", "maybe": "2025-01-01T00:00:01Z"}"#)
                .unwrap();
        assert_eq!(b.at, 1_735_689_600_000);
        assert_eq!(b.maybe, Some(1_735_689_601_000));
    }

    #[test]
    fn test_accepts_offsets_and_null() {
        let s: Stamped =
            serde_json::from_str(r#"{"at": "2025-01-01T02:00:00+02:00", "maybe": null}"#).unwrap();
        assert_eq!(s.at, 1_735_689_600_000);
        assert_eq!(s.maybe, None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Stamped>(r#"{"at": "yesterday"}"#).is_err());
        assert!(parse_millis("not a date").is_err());
        assert_eq!(parse_millis(" 42 "), Ok(42));
    }
}
