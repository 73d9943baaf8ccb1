//! Configuration for bulk operations.

use anyhow::Context;
use postgresql_copy::DEFAULT_FLUSH_THRESHOLD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// What `update` does with records whose key is absent from the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedUpdate {
    /// Fail the call and roll it back.
    #[default]
    Fail,
    /// Leave the rows out silently.
    Ignore,
}

/// Configuration for a [`BulkUploader`](crate::BulkUploader).
///
/// # TOML format
///
/// ```toml
/// flush_threshold = 65531
/// read_back_generated = true
/// insert_generated = false
/// unmatched_update = "fail"
/// staging_prefix = "pgbulk_stage"
/// statement_timeout = "30s"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Pending COPY bytes that trigger a send.
    pub flush_threshold: usize,

    /// Whether plain inserts read server-generated values back into the
    /// records.
    pub read_back_generated: bool,

    /// Whether inserts send `Identity` and `Default` columns instead of
    /// letting the server fill them.
    pub insert_generated: bool,

    /// Handling of update records whose key matches no row.
    pub unmatched_update: UnmatchedUpdate,

    /// Prefix for per-call staging table names.
    pub staging_prefix: String,

    /// Bound on each network operation; `None` waits forever.
    #[serde(
        serialize_with = "serialize_timeout",
        deserialize_with = "deserialize_timeout"
    )]
    pub statement_timeout: Option<Duration>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            read_back_generated: true,
            insert_generated: false,
            unmatched_update: UnmatchedUpdate::Fail,
            staging_prefix: "pgbulk_stage".to_string(),
            statement_timeout: None,
        }
    }
}

impl BulkConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    pub fn with_read_back_generated(mut self, enabled: bool) -> Self {
        self.read_back_generated = enabled;
        self
    }

    pub fn with_insert_generated(mut self, enabled: bool) -> Self {
        self.insert_generated = enabled;
        self
    }

    pub fn with_unmatched_update(mut self, handling: UnmatchedUpdate) -> Self {
        self.unmatched_update = handling;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

/// Parse a duration string like "1h", "30m", "300s", "300" into seconds.
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
pub fn parse_duration_to_secs(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid hours value: {num_str}"))?;
        return hours
            .checked_mul(3600)
            .with_context(|| format!("Duration out of range: {s}"));
    }
    if let Some(num_str) = s.strip_suffix('m') {
        let minutes: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid minutes value: {num_str}"))?;
        return minutes
            .checked_mul(60)
            .with_context(|| format!("Duration out of range: {s}"));
    }
    if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid seconds value: {num_str}"))?;
        return Ok(secs);
    }

    // No suffix - treat as seconds
    s.parse::<u64>()
        .with_context(|| format!("Invalid duration value: {s}"))
}

fn serialize_timeout<S: Serializer>(timeout: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match timeout {
        Some(d) => s.serialize_some(&format!("{}s", d.as_secs())),
        None => s.serialize_none(),
    }
}

fn deserialize_timeout<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    raw.map(|s| {
        parse_duration_to_secs(&s)
            .map(Duration::from_secs)
            .map_err(|e| serde::de::Error::custom(format!("{e:#}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_to_secs("300").unwrap(), 300);
        assert_eq!(parse_duration_to_secs("45s").unwrap(), 45);
        assert_eq!(parse_duration_to_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_to_secs(" 2h ").unwrap(), 7200);
        assert!(parse_duration_to_secs("").is_err());
        assert!(parse_duration_to_secs("abc").is_err());
        assert!(parse_duration_to_secs("-5s").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        let err = parse_duration_to_secs("9999999999999999h").unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(parse_duration_to_secs("999999999999999999m").is_err());
        assert_eq!(
            parse_duration_to_secs(&format!("{}h", u64::MAX / 3600)).unwrap(),
            u64::MAX / 3600 * 3600
        );

        let err = toml::from_str::<BulkConfig>(r#"statement_timeout = "9999999999999999h""#)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_defaults() {
        let config = BulkConfig::default();
        assert_eq!(config.flush_threshold, 65531);
        assert!(config.read_back_generated);
        assert!(!config.insert_generated);
        assert_eq!(config.unmatched_update, UnmatchedUpdate::Fail);
        assert_eq!(config.staging_prefix, "pgbulk_stage");
        assert_eq!(config.statement_timeout, None);
    }

    #[test]
    fn test_toml_partial_override() {
        let config: BulkConfig = toml::from_str(
            r#"
unmatched_update = "ignore"
statement_timeout = "2m"
"#,
        )
        .unwrap();
        assert_eq!(config.unmatched_update, UnmatchedUpdate::Ignore);
        assert_eq!(config.statement_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    }

    #[test]
    fn test_toml_rejects_bad_timeout() {
        let err = toml::from_str::<BulkConfig>(r#"statement_timeout = "soon""#).unwrap_err();
        assert!(err.to_string().contains("Invalid duration value"));
    }
}
