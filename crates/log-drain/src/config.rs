// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration read from environment variables.
//!
//! The process has no command-line flags; every setting comes from the
//! environment. Connection settings for the queue, the ingestion service and
//! the object store follow the variable names used by the services that push
//! records into the queue (`REDIS_*`, `SLS_*`, `OSS_*`). Pipeline tunables
//! use the `DRAIN_*` prefix.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants;
use crate::error::ConfigError;

const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_REDIS_LIST_KEY: &str = "RedisMonolog";
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
const DEFAULT_DEAD_LETTER_PREFIX: &str = "dead-letter";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: u32,
    pub list_key: String,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("list_key", &self.list_key)
            .finish()
    }
}

#[derive(Clone)]
pub struct IntakeConfig {
    pub endpoint: String,
    pub access_key: String,
    pub access_secret: String,
    pub project: String,
    pub log_store: String,
    pub topic: String,
    pub use_compression: bool,
    pub compression_level: i32,
}

impl fmt::Debug for IntakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .field("project", &self.project)
            .field("log_store", &self.log_store)
            .field("topic", &self.topic)
            .field("use_compression", &self.use_compression)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

/// Object store settings. The endpoint is optional: without one, large
/// records are delivered degraded instead of being uploaded.
#[derive(Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: Option<String>,
    pub access_key: String,
    pub access_secret: String,
    pub bucket: String,
    /// Signing region. S3-compatible services often ignore it.
    pub region: Option<String>,
    /// Address the bucket as `{bucket}.{host}` instead of `{host}/{bucket}`.
    pub virtual_hosted_style: bool,
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("virtual_hosted_style", &self.virtual_hosted_style)
            .finish()
    }
}

/// What happens to a batch once its send attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbandonPolicyKind {
    /// Report and discard.
    #[default]
    Drop,
    /// Write the batch to the object store before discarding it.
    DeadLetter,
}

impl FromStr for AbandonPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(AbandonPolicyKind::Drop),
            "dead_letter" | "dead-letter" => Ok(AbandonPolicyKind::DeadLetter),
            other => Err(format!("expected `drop` or `dead_letter`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_batch_bytes: usize,
    pub max_batch_entries: usize,
    pub flush_interval: Duration,
    /// Send attempts per flush cycle, at least 1.
    pub max_send_attempts: u32,
    pub idle_polls_before_sleep: u32,
    pub idle_sleep: Duration,
    pub abandon_policy: AbandonPolicyKind,
    pub dead_letter_prefix: String,
    pub flush_on_shutdown: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_batch_bytes: constants::MAX_BATCH_BYTES,
            max_batch_entries: constants::MAX_BATCH_ENTRIES,
            flush_interval: constants::FLUSH_INTERVAL,
            max_send_attempts: constants::MAX_SEND_ATTEMPTS,
            idle_polls_before_sleep: constants::IDLE_POLLS_BEFORE_SLEEP,
            idle_sleep: constants::IDLE_SLEEP,
            abandon_policy: AbandonPolicyKind::Drop,
            dead_letter_prefix: DEFAULT_DEAD_LETTER_PREFIX.to_string(),
            flush_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub intake: IntakeConfig,
    pub object_store: ObjectStoreConfig,
    pub pipeline: PipelineConfig,
    pub http_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable or `None` when it is unset. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let redis = RedisConfig {
            host: get("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            port: parse_or(&get, "REDIS_PORT", DEFAULT_REDIS_PORT)?,
            password: get("REDIS_PASSWORD"),
            database: parse_or(&get, "REDIS_DB", 0)?,
            list_key: get("REDIS_POP_NAME").unwrap_or_else(|| DEFAULT_REDIS_LIST_KEY.to_string()),
        };

        let intake = IntakeConfig {
            endpoint: required("SLS_ENDPOINT")?,
            access_key: required("SLS_ACCESS_KEY")?,
            access_secret: required("SLS_ACCESS_SECRET")?,
            project: required("SLS_PROJECT")?,
            log_store: required("SLS_LOG_STORE")?,
            topic: get("SLS_TOPIC").unwrap_or_default(),
            use_compression: parse_bool_or(&get, "SLS_USE_COMPRESSION", false)?,
            compression_level: parse_or(&get, "SLS_COMPRESSION_LEVEL", DEFAULT_COMPRESSION_LEVEL)?,
        };

        let object_store = ObjectStoreConfig {
            endpoint: get("OSS_ENDPOINT"),
            access_key: get("OSS_ACCESS_KEY").unwrap_or_default(),
            access_secret: get("OSS_ACCESS_SECRET").unwrap_or_default(),
            bucket: get("OSS_BUCKET").unwrap_or_default(),
            region: get("OSS_REGION"),
            virtual_hosted_style: parse_bool_or(&get, "OSS_VIRTUAL_HOSTED_STYLE", false)?,
        };

        let defaults = PipelineConfig::default();
        let max_send_attempts: u32 =
            parse_or(&get, "DRAIN_MAX_SEND_ATTEMPTS", defaults.max_send_attempts)?;
        if max_send_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "DRAIN_MAX_SEND_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one send attempt is required".to_string(),
            });
        }
        let abandon_policy = match get("DRAIN_ABANDON_POLICY") {
            Some(value) => value
                .parse::<AbandonPolicyKind>()
                .map_err(|reason| ConfigError::Invalid {
                    key: "DRAIN_ABANDON_POLICY",
                    value,
                    reason,
                })?,
            None => defaults.abandon_policy,
        };

        let pipeline = PipelineConfig {
            max_send_attempts,
            idle_polls_before_sleep: parse_or(
                &get,
                "DRAIN_IDLE_POLLS",
                defaults.idle_polls_before_sleep,
            )?,
            idle_sleep: Duration::from_millis(parse_or(
                &get,
                "DRAIN_IDLE_SLEEP_MS",
                duration_millis(defaults.idle_sleep),
            )?),
            flush_interval: Duration::from_millis(parse_or(
                &get,
                "DRAIN_FLUSH_INTERVAL_MS",
                duration_millis(defaults.flush_interval),
            )?),
            abandon_policy,
            dead_letter_prefix: get("DRAIN_DEAD_LETTER_PREFIX")
                .map(|prefix| prefix.trim_matches('/').to_string())
                .unwrap_or(defaults.dead_letter_prefix),
            flush_on_shutdown: parse_bool_or(
                &get,
                "DRAIN_FLUSH_ON_SHUTDOWN",
                defaults.flush_on_shutdown,
            )?,
            ..defaults
        };

        Ok(Config {
            redis,
            intake,
            object_store,
            pipeline,
            http_timeout: Duration::from_secs(parse_or(
                &get,
                "DRAIN_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            log_level: get("DRAIN_LOG_LEVEL")
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| ConfigError::Invalid {
                key,
                reason: err.to_string(),
                value,
            }),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 5] = [
        ("SLS_ENDPOINT", "https://cn-hangzhou.log.example.com"),
        ("SLS_ACCESS_KEY", "key"),
        ("SLS_ACCESS_SECRET", "secret"),
        ("SLS_PROJECT", "project"),
        ("SLS_LOG_STORE", "store"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.redis.host, "127.0.0.1");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.password, None);
        assert_eq!(config.redis.database, 0);
        assert_eq!(config.redis.list_key, "RedisMonolog");
        assert_eq!(config.intake.topic, "");
        assert!(!config.intake.use_compression);
        assert_eq!(config.object_store.endpoint, None);
        assert_eq!(config.object_store.region, None);
        assert!(!config.object_store.virtual_hosted_style);
        assert_eq!(config.pipeline.max_send_attempts, 3);
        assert_eq!(config.pipeline.idle_polls_before_sleep, 3);
        assert_eq!(config.pipeline.idle_sleep, Duration::from_secs(1));
        assert_eq!(config.pipeline.flush_interval, Duration::from_millis(300));
        assert_eq!(config.pipeline.max_batch_bytes, 2 * 1024 * 1024);
        assert_eq!(config.pipeline.max_batch_entries, 4095);
        assert_eq!(config.pipeline.abandon_policy, AbandonPolicyKind::Drop);
        assert_eq!(config.pipeline.dead_letter_prefix, "dead-letter");
        assert!(config.pipeline.flush_on_shutdown);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_required_variable() {
        let err = Config::from_lookup(lookup(&REQUIRED[..4])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "SLS_LOG_STORE environment variable is not set"
        );
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("REDIS_HOST", "  "));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.redis.host, "127.0.0.1");
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("REDIS_HOST", "redis.internal"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "hunter2"),
            ("REDIS_DB", "4"),
            ("REDIS_POP_NAME", "app-logs"),
            ("SLS_TOPIC", "web"),
            ("SLS_USE_COMPRESSION", "true"),
            ("SLS_COMPRESSION_LEVEL", "9"),
            ("OSS_ENDPOINT", "https://oss.example.com"),
            ("OSS_BUCKET", "big-logs"),
            ("OSS_REGION", "oss-cn-hangzhou"),
            ("OSS_VIRTUAL_HOSTED_STYLE", "true"),
            ("DRAIN_MAX_SEND_ATTEMPTS", "5"),
            ("DRAIN_IDLE_POLLS", "10"),
            ("DRAIN_IDLE_SLEEP_MS", "250"),
            ("DRAIN_FLUSH_INTERVAL_MS", "1000"),
            ("DRAIN_ABANDON_POLICY", "dead_letter"),
            ("DRAIN_DEAD_LETTER_PREFIX", "/failed/"),
            ("DRAIN_FLUSH_ON_SHUTDOWN", "no"),
            ("DRAIN_HTTP_TIMEOUT_SECS", "5"),
            ("DRAIN_LOG_LEVEL", "DEBUG"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.redis.host, "redis.internal");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.password.as_deref(), Some("hunter2"));
        assert_eq!(config.redis.database, 4);
        assert_eq!(config.redis.list_key, "app-logs");
        assert_eq!(config.intake.topic, "web");
        assert!(config.intake.use_compression);
        assert_eq!(config.intake.compression_level, 9);
        assert_eq!(
            config.object_store.endpoint.as_deref(),
            Some("https://oss.example.com")
        );
        assert_eq!(config.object_store.bucket, "big-logs");
        assert_eq!(config.object_store.region.as_deref(), Some("oss-cn-hangzhou"));
        assert!(config.object_store.virtual_hosted_style);
        assert_eq!(config.pipeline.max_send_attempts, 5);
        assert_eq!(config.pipeline.idle_polls_before_sleep, 10);
        assert_eq!(config.pipeline.idle_sleep, Duration::from_millis(250));
        assert_eq!(config.pipeline.flush_interval, Duration::from_secs(1));
        assert_eq!(config.pipeline.abandon_policy, AbandonPolicyKind::DeadLetter);
        assert_eq!(config.pipeline.dead_letter_prefix, "failed");
        assert!(!config.pipeline.flush_on_shutdown);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("REDIS_PORT", "not-a-port"),
            ("REDIS_DB", "-1"),
            ("SLS_USE_COMPRESSION", "maybe"),
            ("DRAIN_MAX_SEND_ATTEMPTS", "0"),
            ("DRAIN_ABANDON_POLICY", "retry_forever"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((key, value));
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "expected invalid {key}, got {err}"
            );
        }
    }

    #[test]
    fn test_secrets_are_not_debug_printed() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("REDIS_PASSWORD", "hunter2"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("\"secret\""));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        for (key, value) in REQUIRED {
            env::set_var(key, value);
        }
        env::set_var("REDIS_POP_NAME", "from-env");

        let config = Config::from_env().unwrap();
        assert_eq!(config.redis.list_key, "from-env");
        assert_eq!(config.intake.project, "project");

        for (key, _) in REQUIRED {
            env::remove_var(key);
        }
        env::remove_var("REDIS_POP_NAME");
    }

    #[test]
    #[serial]
    fn test_from_env_missing_endpoint() {
        env::remove_var("SLS_ENDPOINT");
        let config = Config::from_env();
        assert!(config.is_err());
        assert_eq!(
            config.unwrap_err().to_string(),
            "SLS_ENDPOINT environment variable is not set"
        );
    }
}
