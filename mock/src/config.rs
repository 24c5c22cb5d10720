//! Mock endpoint configuration.
//!
//! Loadable from TOML (snake_case keys) or from the query parameters of an
//! endpoint URI (camelCase keys, e.g. `mock:result?retainLast=10&failFast=false`).
//! Durations are given in milliseconds.

use crate::error::ConfigError;
use crate::retention::RetentionPolicy;
use relay_core::uri::EndpointUri;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Identifier used in diagnostics.
    pub name: Option<String>,

    /// Exact number of messages expected. `-1` means no exact expectation.
    pub expected_count: i64,

    /// Grace sleep before declaring a zero-message endpoint satisfied.
    #[serde(deserialize_with = "millis")]
    pub sleep_for_empty_test: Duration,

    /// Verification timeout. Zero means the 10 second default.
    #[serde(deserialize_with = "millis")]
    pub result_wait_time: Duration,

    /// Verification must take at least this long.
    #[serde(deserialize_with = "millis")]
    pub result_minimum_wait_time: Duration,

    /// Re-assert once after this period to catch late arrivals.
    #[serde(deserialize_with = "millis")]
    pub assert_period: Duration,

    /// Keep only the first N received exchanges. `-1` is unlimited.
    pub retain_first: i64,

    /// Keep only the last N received exchanges. `-1` is unlimited.
    pub retain_last: i64,

    /// Log throughput every N messages. Zero disables.
    pub report_group: u64,

    pub fail_fast: bool,

    /// Deep-copy exchanges before retaining them.
    pub copy_on_exchange: bool,

    /// Log every arrival at info level.
    pub log: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: None,
            expected_count: -1,
            sleep_for_empty_test: Duration::ZERO,
            result_wait_time: Duration::ZERO,
            result_minimum_wait_time: Duration::ZERO,
            assert_period: Duration::ZERO,
            retain_first: -1,
            retain_last: -1,
            report_group: 0,
            fail_fast: true,
            copy_on_exchange: true,
            log: false,
        }
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl MockConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Configuration from the query parameters of `uri`. Unknown options are ignored.
    pub fn from_uri(uri: &EndpointUri) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (key, value) in &uri.params {
            config.apply(key, value)?;
        }
        Ok(config)
    }

    /// Applies one camelCase option.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "name" => self.name = Some(value.to_string()),
            "expectedCount" => self.expected_count = parse(key, value)?,
            "sleepForEmptyTest" => self.sleep_for_empty_test = Duration::from_millis(parse(key, value)?),
            "resultWaitTime" => self.result_wait_time = Duration::from_millis(parse(key, value)?),
            "resultMinimumWaitTime" => {
                self.result_minimum_wait_time = Duration::from_millis(parse(key, value)?)
            }
            "assertPeriod" => self.assert_period = Duration::from_millis(parse(key, value)?),
            "retainFirst" => self.retain_first = parse(key, value)?,
            "retainLast" => self.retain_last = parse(key, value)?,
            "reportGroup" => self.report_group = parse(key, value)?,
            "failFast" => self.fail_fast = parse(key, value)?,
            "copyOnExchange" => self.copy_on_exchange = parse(key, value)?,
            "log" => self.log = parse(key, value)?,
            unknown => tracing::debug!(option = unknown, value, "Ignoring unknown mock option"),
        }
        Ok(())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::from_bounds(self.retain_first, self.retain_last)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MockConfig::default();
        assert_eq!(config.expected_count, -1);
        assert!(config.fail_fast);
        assert!(config.copy_on_exchange);
        assert!(config.retention().is_unbounded());
    }

    #[test]
    fn from_toml() {
        let config = MockConfig::from_toml_str(
            r#"
            name = "orders"
            retain_last = 10
            assert_period = 250
            fail_fast = false
            "#,
        )
        .unwrap();
        assert_eq!(config.name.as_deref(), Some("orders"));
        assert_eq!(config.retention(), RetentionPolicy { first: None, last: Some(10) });
        assert_eq!(config.assert_period, Duration::from_millis(250));
        assert!(!config.fail_fast);
        assert_eq!(config.expected_count, -1);
    }

    #[test]
    fn from_uri_is_lenient() {
        let uri = EndpointUri::parse("mock:result?retainFirst=3&log=true&bogus=1").unwrap();
        let config = MockConfig::from_uri(&uri).unwrap();
        assert_eq!(config.retain_first, 3);
        assert!(config.log);
    }

    #[test]
    fn malformed_value() {
        let uri = EndpointUri::parse("mock:result?failFast=maybe").unwrap();
        let err = MockConfig::from_uri(&uri).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref key, .. } if key == "failFast"));
    }

    #[test]
    fn bad_toml() {
        assert!(matches!(
            MockConfig::from_toml_str("retain_last = \"ten\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
