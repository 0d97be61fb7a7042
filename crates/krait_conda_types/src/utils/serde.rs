//! Serde helpers shared by the record types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use fxhash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

/// Timestamps in repodata are given in milliseconds since the epoch, but
/// very old entries still carry plain seconds. Heuristic: anything below
/// 253_402_300_799 (9999-12-31 in seconds) is interpreted as seconds.
pub struct Timestamp;

const MAX_SECONDS_TIMESTAMP: i64 = 253_402_300_799;

impl<'de> DeserializeAs<'de, DateTime<Utc>> for Timestamp {
    fn deserialize_as<D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let timestamp = i64::deserialize(deserializer)?;

        // Convert old second-based timestamps to milliseconds.
        let timestamp = if timestamp < MAX_SECONDS_TIMESTAMP {
            timestamp * 1000
        } else {
            timestamp
        };

        Utc.timestamp_millis_opt(timestamp)
            .single()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}

impl SerializeAs<DateTime<Utc>> for Timestamp {
    fn serialize_as<S>(source: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.timestamp_millis().serialize(serializer)
    }
}

/// Paths recorded in prefix records always use forward slashes, also on
/// Windows.
pub struct NormalizedPath;

impl<'de> DeserializeAs<'de, PathBuf> for NormalizedPath {
    fn deserialize_as<D>(deserializer: D) -> Result<PathBuf, D::Error>
    where
        D: Deserializer<'de>,
    {
        let path = String::deserialize(deserializer)?;
        Ok(PathBuf::from(path))
    }
}

impl SerializeAs<PathBuf> for NormalizedPath {
    fn serialize_as<S>(source: &PathBuf, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source
            .to_string_lossy()
            .replace('\\', "/")
            .serialize(serializer)
    }
}

/// Serializes a map sorted alphabetically by key so that output is stable.
pub fn sort_map_alphabetically<T: Serialize, S: Serializer>(
    value: &FxHashMap<String, T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<BTreeMap<_, _>>()
        .serialize(serializer)
}
