//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use courier_domain::DEFAULT_DEDUP_ATTRIBUTE;
use courier_exec::OrchestratorConfig;
use courier_guard::{BreakerConfig, FailureFilter, RetryConfig};

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (test, development, production)
    pub environment: Environment,

    /// Subscription and message routing
    pub broker: BrokerConfig,

    /// Concurrency and timeouts
    pub pipeline: PipelineConfig,

    /// Processor circuit breaker
    pub breaker: BreakerConfig,

    /// Retry for processor and ledger calls
    pub retry: RetryConfig,

    /// Log output format
    pub log_format: LogFormat,

    /// PostgreSQL connection string; the memory ledger is used when unset
    pub database_url: Option<String>,
}

/// Subscription and message routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Topic messages are published to
    pub topic: String,
    /// Subscription the daemon pulls from
    pub subscription: String,
    /// Attribute carrying the deduplication key
    pub dedup_attribute: String,
}

/// Concurrency and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum deliveries handled concurrently
    pub max_in_flight: usize,
    /// Bound on one processor invocation
    pub processing_timeout: Duration,
    /// Bound on one ledger call
    pub ledger_timeout: Duration,
    /// Bound on one ack or nack
    pub settle_timeout: Duration,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Self::load_environment(&lookup)?;
        let broker = Self::load_broker_config(&lookup);
        let pipeline = Self::load_pipeline_config(&lookup)?;
        let breaker = Self::load_breaker_config(&lookup)?;
        let retry = Self::load_retry_config(&lookup)?;
        let log_format = Self::load_log_format(&lookup)?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            environment,
            broker,
            pipeline,
            breaker,
            retry,
            log_format,
            database_url,
        })
    }

    /// Create test configuration.
    ///
    /// Millisecond-scale waits so tests settle quickly.
    pub fn test() -> Self {
        Self {
            environment: Environment::Test,
            retry: RetryConfig {
                initial_wait: Duration::from_millis(10),
                max_wait: Duration::from_millis(100),
                max_total_deadline: Duration::from_secs(2),
                attempt_timeout: None,
            },
            pipeline: PipelineConfig {
                max_in_flight: 2,
                processing_timeout: Duration::from_secs(1),
                ledger_timeout: Duration::from_millis(500),
                settle_timeout: Duration::from_millis(500),
            },
            ..Self::default()
        }
    }

    /// Orchestrator settings derived from this configuration.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            dedup_attribute: self.broker.dedup_attribute.clone(),
            processing_timeout: self.pipeline.processing_timeout,
            ledger_timeout: self.pipeline.ledger_timeout,
            settle_timeout: self.pipeline.settle_timeout,
            retry: self.retry.clone(),
        }
    }

    fn load_environment(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<Environment> {
        let env_str = lookup("COURIER_ENV").unwrap_or_else(|| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid COURIER_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_broker_config(lookup: &impl Fn(&str) -> Option<String>) -> BrokerConfig {
        let topic = lookup("COURIER_TOPIC").unwrap_or_else(|| "orders".to_string());
        let subscription =
            lookup("COURIER_SUBSCRIPTION").unwrap_or_else(|| format!("{}-sub", topic));
        let dedup_attribute = lookup("COURIER_DEDUP_ATTRIBUTE")
            .unwrap_or_else(|| DEFAULT_DEDUP_ATTRIBUTE.to_string());

        BrokerConfig { topic, subscription, dedup_attribute }
    }

    fn load_pipeline_config(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> DaemonResult<PipelineConfig> {
        let max_in_flight: usize = Self::load_parsed(lookup, "COURIER_MAX_IN_FLIGHT", 2)?;
        if max_in_flight == 0 {
            return Err(DaemonError::Config("COURIER_MAX_IN_FLIGHT must be at least 1".into()));
        }

        Ok(PipelineConfig {
            max_in_flight,
            processing_timeout: Duration::from_secs(Self::load_parsed(
                lookup,
                "COURIER_PROCESSING_TIMEOUT_SECS",
                30,
            )?),
            ledger_timeout: Duration::from_secs(Self::load_parsed(
                lookup,
                "COURIER_LEDGER_TIMEOUT_SECS",
                5,
            )?),
            settle_timeout: Duration::from_secs(Self::load_parsed(
                lookup,
                "COURIER_SETTLE_TIMEOUT_SECS",
                10,
            )?),
        })
    }

    fn load_breaker_config(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> DaemonResult<BreakerConfig> {
        let failure_threshold: u32 =
            Self::load_parsed(lookup, "COURIER_BREAKER_FAILURE_THRESHOLD", 3)?;
        let half_open_success_threshold: u32 =
            Self::load_parsed(lookup, "COURIER_BREAKER_HALF_OPEN_SUCCESSES", 3)?;

        if failure_threshold == 0 || half_open_success_threshold == 0 {
            return Err(DaemonError::Config("Breaker thresholds must be at least 1".into()));
        }

        Ok(BreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(Self::load_parsed(
                lookup,
                "COURIER_BREAKER_RECOVERY_TIMEOUT_SECS",
                10,
            )?),
            half_open_success_threshold,
            failure_filter: Self::load_failure_filter(lookup)?,
        })
    }

    fn load_failure_filter(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> DaemonResult<FailureFilter> {
        let filter = lookup("COURIER_BREAKER_FAILURE_FILTER").map(|v| v.trim().to_lowercase());

        match filter.as_deref() {
            None | Some("retryable") => Ok(FailureFilter::RetryableOnly),
            Some("all") => Ok(FailureFilter::AllErrors),
            Some(other) => Err(DaemonError::Config(format!(
                "Invalid COURIER_BREAKER_FAILURE_FILTER: {}. Expected: retryable, all",
                other
            ))),
        }
    }

    fn load_retry_config(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<RetryConfig> {
        let initial_wait =
            Duration::from_millis(Self::load_parsed(lookup, "COURIER_RETRY_INITIAL_WAIT_MS", 1000)?);
        let max_wait =
            Duration::from_secs(Self::load_parsed(lookup, "COURIER_RETRY_MAX_WAIT_SECS", 30)?);
        let max_total_deadline =
            Duration::from_secs(Self::load_parsed(lookup, "COURIER_RETRY_DEADLINE_SECS", 90)?);

        if initial_wait > max_wait {
            return Err(DaemonError::Config(
                "COURIER_RETRY_INITIAL_WAIT_MS exceeds COURIER_RETRY_MAX_WAIT_SECS".into(),
            ));
        }

        Ok(RetryConfig { initial_wait, max_wait, max_total_deadline, attempt_timeout: None })
    }

    fn load_log_format(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<LogFormat> {
        match lookup("COURIER_LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("pretty") | Some("text") => Ok(LogFormat::Pretty),
            Some("json") => Ok(LogFormat::Json),
            Some(other) => Err(DaemonError::Config(format!(
                "Invalid COURIER_LOG_FORMAT: {}. Expected: pretty, json",
                other
            ))),
        }
    }

    fn load_parsed<T: FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
        default: T,
    ) -> DaemonResult<T> {
        match lookup(key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            broker: BrokerConfig {
                topic: "orders".to_string(),
                subscription: "orders-sub".to_string(),
                dedup_attribute: DEFAULT_DEDUP_ATTRIBUTE.to_string(),
            },
            pipeline: PipelineConfig {
                max_in_flight: 2,
                processing_timeout: Duration::from_secs(30),
                ledger_timeout: Duration::from_secs(5),
                settle_timeout: Duration::from_secs(10),
            },
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            log_format: LogFormat::Pretty,
            database_url: None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> DaemonResult<Config> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.broker.topic, "orders");
        assert_eq!(config.broker.subscription, "orders-sub");
        assert_eq!(config.broker.dedup_attribute, "order_id");
        assert_eq!(config.pipeline.max_in_flight, 2);
        assert_eq!(config.pipeline.processing_timeout, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.breaker.half_open_success_threshold, 3);
        assert_eq!(config.breaker.failure_filter, FailureFilter::RetryableOnly);
        assert_eq!(config.pipeline.settle_timeout, Duration::from_secs(10));
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("COURIER_ENV", "prod"),
            ("COURIER_TOPIC", "payments"),
            ("COURIER_MAX_IN_FLIGHT", "8"),
            ("COURIER_BREAKER_FAILURE_THRESHOLD", "5"),
            ("COURIER_BREAKER_FAILURE_FILTER", "All"),
            ("COURIER_SETTLE_TIMEOUT_SECS", "3"),
            ("COURIER_RETRY_INITIAL_WAIT_MS", "250"),
            ("COURIER_LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/courier"),
        ])
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.broker.topic, "payments");
        assert_eq!(config.broker.subscription, "payments-sub");
        assert_eq!(config.pipeline.max_in_flight, 8);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.failure_filter, FailureFilter::AllErrors);
        assert_eq!(config.orchestrator().settle_timeout, Duration::from_secs(3));
        assert_eq!(config.retry.initial_wait, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/courier"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(from_pairs(&[("COURIER_ENV", "staging")]), Err(DaemonError::Config(_))));
        assert!(matches!(
            from_pairs(&[("COURIER_MAX_IN_FLIGHT", "zero")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("COURIER_MAX_IN_FLIGHT", "0")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("COURIER_LOG_FORMAT", "xml")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("COURIER_BREAKER_FAILURE_FILTER", "fatal")]),
            Err(DaemonError::Config(_))
        ));
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.environment, Environment::Test);
        assert!(config.retry.max_total_deadline <= Duration::from_secs(2));
        assert_eq!(config.orchestrator().dedup_attribute, "order_id");
    }
}
