//! `serde_with`-style helper for `Option<time::Duration>` fields, which the
//! `time` crate's own `serde-human-readable` feature does not cover for
//! `Option<Duration>` (only `OffsetDateTime`).
use serde::{Deserialize, Deserializer, Serializer};
use time::Duration;

pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&d.whole_seconds()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: Option<i64> = Option::deserialize(deserializer)?;
    Ok(seconds.map(Duration::seconds))
}
