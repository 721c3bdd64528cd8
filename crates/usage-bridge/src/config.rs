//! Configuration management

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use usage_bridge_common::{env, CommonError};

// ============================================================================
// Bridge Configuration Constants
// ============================================================================

/// Default upstream API URL for local development.
pub const DEFAULT_API_URL: &str = "http://localhost:9882";

/// Default upstream events path. The cursor is appended as `&after_guid=`.
pub const DEFAULT_EVENTS_PATH: &str =
    "/v2/app_usage_events?order-direction=asc&results-per-page=50";

/// Default usage collector URL.
pub const DEFAULT_COLLECTOR_URL: &str = "http://localhost:9080";

/// Default checkpoint database URL.
pub const DEFAULT_CHECKPOINT_URL: &str = "http://localhost:5984";

/// Default checkpoint database name.
pub const DEFAULT_CHECKPOINT_DATABASE: &str = "usage-bridge";

/// Default id of the progress document.
pub const DEFAULT_CHECKPOINT_DOCUMENT_ID: &str = "usage-bridge-progress";

/// Default first polling delay in milliseconds.
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 5_000;

/// Default longest polling delay in milliseconds (4 minutes).
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 240_000;

/// Default minimum event age in milliseconds before it is processed.
pub const DEFAULT_MIN_AGE_MS: u64 = 60_000;

/// Default time a failure may go without a success before the bridge is
/// reported unhealthy, in milliseconds (3 minutes).
pub const DEFAULT_HEALTH_FAILURE_THRESHOLD_MS: u64 = 180_000;

/// Default HTTP client timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub upstream: UpstreamConfig,
    pub collector: CollectorConfig,
    pub checkpoint: CheckpointConfig,
    pub polling: PollingConfig,
    pub health: HealthConfig,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub events_path: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub secured: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub url: String,
    pub database: String,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub min_age_ms: u64,
    pub last_known_guid: Option<String>,
    /// Organizations to report, all of them when unset
    pub orgs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub failure_threshold_ms: u64,
}

impl PollingConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_millis(self.min_age_ms)
    }
}

impl HealthConfig {
    pub fn failure_threshold(&self) -> Duration {
        Duration::from_millis(self.failure_threshold_ms)
    }
}

impl BridgeConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn from_env() -> Result<Self, CommonError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment
    pub fn from_lookup<L>(lookup: L) -> Result<Self, CommonError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let checkpoint_url = match env::optional(&lookup, "DBALIAS") {
            Some(alias) => env::optional(&lookup, &alias.to_uppercase()),
            None => env::optional(&lookup, "DB"),
        }
        .unwrap_or_else(|| DEFAULT_CHECKPOINT_URL.to_string());

        let config = BridgeConfig {
            upstream: UpstreamConfig {
                url: env::string_or(&lookup, "API", DEFAULT_API_URL),
                events_path: env::string_or(&lookup, "EVENTS_PATH", DEFAULT_EVENTS_PATH),
                token: env::optional(&lookup, "CF_TOKEN"),
            },
            collector: CollectorConfig {
                url: env::string_or(&lookup, "COLLECTOR", DEFAULT_COLLECTOR_URL),
                token: env::optional(&lookup, "COLLECTOR_TOKEN"),
                secured: env::parse_or(&lookup, "SECURED", false)?,
            },
            checkpoint: CheckpointConfig {
                url: checkpoint_url,
                database: env::string_or(&lookup, "CHECKPOINT_DB", DEFAULT_CHECKPOINT_DATABASE),
                document_id: env::string_or(
                    &lookup,
                    "CHECKPOINT_DOCUMENT_ID",
                    DEFAULT_CHECKPOINT_DOCUMENT_ID,
                ),
            },
            polling: PollingConfig {
                min_interval_ms: env::parse_or(&lookup, "MIN_INTERVAL_TIME", DEFAULT_MIN_INTERVAL_MS)?,
                max_interval_ms: env::parse_or(&lookup, "MAX_INTERVAL_TIME", DEFAULT_MAX_INTERVAL_MS)?,
                min_age_ms: env::parse_or(&lookup, "GUID_MIN_AGE", DEFAULT_MIN_AGE_MS)?,
                last_known_guid: env::optional(&lookup, "LAST_RECORDED_GUID"),
                orgs: env::json(&lookup, "ORGS_TO_REPORT")?,
            },
            health: HealthConfig {
                failure_threshold_ms: env::parse_or(
                    &lookup,
                    "HEALTH_FAILURE_THRESHOLD",
                    DEFAULT_HEALTH_FAILURE_THRESHOLD_MS,
                )?,
            },
            http_timeout_secs: env::parse_or(&lookup, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.polling.min_interval_ms == 0 {
            return Err(CommonError::config("MIN_INTERVAL_TIME must be greater than 0"));
        }

        if self.polling.max_interval_ms < self.polling.min_interval_ms {
            return Err(CommonError::config(format!(
                "MAX_INTERVAL_TIME ({}) cannot be less than MIN_INTERVAL_TIME ({})",
                self.polling.max_interval_ms, self.polling.min_interval_ms
            )));
        }

        if self.http_timeout_secs == 0 {
            return Err(CommonError::config("HTTP_TIMEOUT_SECS must be greater than 0"));
        }

        for (name, url) in [
            ("API", &self.upstream.url),
            ("COLLECTOR", &self.collector.url),
            ("DB", &self.checkpoint.url),
        ] {
            Url::parse(url)
                .map_err(|e| CommonError::config(format!("{name} is not a valid URL ({url}): {e}")))?;
        }

        if self.collector.secured && self.collector.token.is_none() {
            tracing::warn!("SECURED is set but no COLLECTOR_TOKEN is configured");
        }

        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                url: DEFAULT_API_URL.to_string(),
                events_path: DEFAULT_EVENTS_PATH.to_string(),
                token: None,
            },
            collector: CollectorConfig {
                url: DEFAULT_COLLECTOR_URL.to_string(),
                token: None,
                secured: false,
            },
            checkpoint: CheckpointConfig {
                url: DEFAULT_CHECKPOINT_URL.to_string(),
                database: DEFAULT_CHECKPOINT_DATABASE.to_string(),
                document_id: DEFAULT_CHECKPOINT_DOCUMENT_ID.to_string(),
            },
            polling: PollingConfig {
                min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
                max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
                min_age_ms: DEFAULT_MIN_AGE_MS,
                last_known_guid: None,
                orgs: None,
            },
            health: HealthConfig {
                failure_threshold_ms: DEFAULT_HEALTH_FAILURE_THRESHOLD_MS,
            },
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}
