//! Serde helpers for policy and statistics types
//!
//! Policies are meant to be loaded by the host application from TOML or JSON,
//! so durations are written as plain millisecond integers rather than serde's
//! default `{secs, nanos}` map.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a [`Duration`] as whole milliseconds (u64)
///
/// ```rust
/// use std::time::Duration;
///
/// use reelforge_resilience::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct UploadTimeouts {
///     #[serde(with = "duration_millis")]
///     connect: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize a Duration as milliseconds, saturating at `u64::MAX`
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Same as [`duration_millis`] for `Option<Duration>`
pub mod option_duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        #[serde(with = "duration_millis")]
        timeout: Duration,
        #[serde(with = "option_duration_millis", default)]
        last_delay: Option<Duration>,
    }

    /// Validates `Duration::from_millis` behavior for the duration millis
    /// serialize scenario.
    ///
    /// Assertions:
    /// - Ensures `json.contains("\"timeout\":1500")` evaluates to true.
    /// - Ensures `json.contains("\"last_delay\":null")` evaluates to true.
    #[test]
    fn test_duration_millis_serialize() {
        let data = TestStruct { timeout: Duration::from_millis(1500), last_delay: None };

        let json = serde_json::to_string(&data).expect("Should serialize valid struct");
        assert!(json.contains("\"timeout\":1500"));
        assert!(json.contains("\"last_delay\":null"));
    }

    /// Tests that milliseconds deserialize to Duration
    #[test]
    fn test_duration_millis_deserialize() {
        let json = r#"{"timeout":2500,"last_delay":40}"#;
        let data: TestStruct = serde_json::from_str(json).expect("Should deserialize valid JSON");

        assert_eq!(data.timeout, Duration::from_millis(2500));
        assert_eq!(data.last_delay, Some(Duration::from_millis(40)));
    }

    /// Missing optional durations default to `None`.
    #[test]
    fn test_option_duration_millis_missing_field() {
        let data: TestStruct = serde_json::from_str(r#"{"timeout":0}"#).unwrap();
        assert_eq!(data.timeout, Duration::ZERO);
        assert_eq!(data.last_delay, None);
    }

    /// Sub-millisecond precision is truncated.
    #[test]
    fn test_duration_millis_truncates_sub_millis() {
        let data = TestStruct { timeout: Duration::from_micros(2750), last_delay: None };

        let json = serde_json::to_string(&data).unwrap();
        let back: TestStruct = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeout, Duration::from_millis(2));
    }
}
