//! Configuration management for the admission demo.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{AdmissionError, Result};
use crate::ratelimit::{IndividualStoreConfig, TotalStoreConfig};
use crate::sms::SmsConfig;

/// Prefix for environment overrides, e.g. `ADMISSION_PER_CALLER__RATE=5`.
pub const ENV_PREFIX: &str = "ADMISSION";

/// Main configuration for the admission demo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Limit for the single-limiter `basic` scenario
    #[serde(default = "default_basic")]
    pub basic: StoreSettings,

    /// Process-wide limit applied to every send
    #[serde(default = "default_global")]
    pub global: StoreSettings,

    /// Limit applied per caller (phone number)
    #[serde(default = "default_per_caller")]
    pub per_caller: StoreSettings,

    /// SMS collaborator configuration
    #[serde(default)]
    pub sms: SmsConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            basic: default_basic(),
            global: default_global(),
            per_caller: default_per_caller(),
            sms: SmsConfig::default(),
        }
    }
}

fn default_basic() -> StoreSettings {
    StoreSettings {
        rate: 5.0,
        burst: 5,
        expires_in_ms: 0,
    }
}

fn default_global() -> StoreSettings {
    StoreSettings {
        rate: 10.0,
        burst: 10,
        expires_in_ms: 0,
    }
}

fn default_per_caller() -> StoreSettings {
    StoreSettings {
        rate: 2.0,
        burst: 2,
        expires_in_ms: 1000,
    }
}

/// File-facing limiter store settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Admissions per second
    pub rate: f64,

    /// Admissions allowed at once; zero means `rate` rounded
    #[serde(default)]
    pub burst: u32,

    /// Idle expiry for per-identifier buckets; zero means the store default
    #[serde(default)]
    pub expires_in_ms: u64,
}

impl StoreSettings {
    /// Reject rates a token bucket cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.rate.is_nan() || self.rate < 0.0 {
            return Err(AdmissionError::Config(format!(
                "rate must be a non-negative number, got {}",
                self.rate
            )));
        }
        Ok(())
    }

    /// Settings for a [`TotalStore`](crate::ratelimit::TotalStore).
    pub fn total(&self) -> Result<TotalStoreConfig> {
        self.validate()?;
        Ok(TotalStoreConfig {
            rate: self.rate,
            burst: self.burst,
        })
    }

    /// Settings for an [`IndividualStore`](crate::ratelimit::IndividualStore).
    pub fn individual(&self) -> Result<IndividualStoreConfig> {
        self.validate()?;
        Ok(IndividualStoreConfig {
            rate: self.rate,
            burst: self.burst,
            expires_in: Duration::from_millis(self.expires_in_ms),
        })
    }
}

impl AdmissionConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, overridden by `ADMISSION_*`
    /// environment variables. Nested keys are separated by `__`.
    ///
    /// Both layers sit on top of [`AdmissionConfig::default`], so a partial
    /// section only replaces the keys it names.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AdmissionConfig::default())
            .map_err(|e| AdmissionError::Config(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<AdmissionConfig>())
            .map_err(|e| AdmissionError::Config(e.to_string()))
    }
}
