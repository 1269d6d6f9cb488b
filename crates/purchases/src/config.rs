//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use entitle_core::{BuildEnvironment, Platform};

pub const ENV_ENVIRONMENT: &str = "ENTITLE_ENVIRONMENT";
pub const ENV_PLATFORM: &str = "ENTITLE_PLATFORM";
pub const ENV_VALIDATION_TIMEOUT_SECS: &str = "ENTITLE_VALIDATION_TIMEOUT_SECS";
pub const ENV_PENDING_TTL_SECS: &str = "ENTITLE_PENDING_TTL_SECS";
pub const ENV_ANDROID_PACKAGE: &str = "ENTITLE_ANDROID_PACKAGE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {message}")]
    Invalid {
        key: &'static str,
        value: String,
        message: String,
    },
}

/// Purchase engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Build flavor. Selects the validation backend and the diagnostic grant.
    pub environment: BuildEnvironment,
    /// Platform whose management page `cancel_subscription` opens.
    pub platform: Platform,
    /// Upper bound on a single receipt validation.
    #[serde(rename = "validation_timeout_secs", with = "seconds")]
    pub validation_timeout: Duration,
    /// Age after which a pending purchase stops blocking a new request.
    #[serde(rename = "pending_ttl_secs", with = "seconds")]
    pub pending_ttl: Duration,
    /// Application package name (Android management URL).
    pub android_package: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: BuildEnvironment::Production,
            platform: Platform::Ios,
            validation_timeout: Duration::from_secs(30),
            pending_ttl: Duration::from_secs(15 * 60),
            android_package: None,
        }
    }
}

impl EngineConfig {
    pub fn with_environment(mut self, environment: BuildEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn with_android_package(mut self, package: impl Into<String>) -> Self {
        self.android_package = Some(package.into());
        self
    }

    /// Read overrides from `ENTITLE_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_ENVIRONMENT) {
            config.environment = raw.parse().map_err(|e: entitle_core::DomainError| {
                invalid(ENV_ENVIRONMENT, &raw, e.to_string())
            })?;
        }
        if let Some(raw) = lookup(ENV_PLATFORM) {
            config.platform = raw.parse().map_err(|e: entitle_core::DomainError| {
                invalid(ENV_PLATFORM, &raw, e.to_string())
            })?;
        }
        if let Some(raw) = lookup(ENV_VALIDATION_TIMEOUT_SECS) {
            config.validation_timeout = parse_secs(ENV_VALIDATION_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PENDING_TTL_SECS) {
            config.pending_ttl = parse_secs(ENV_PENDING_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ANDROID_PACKAGE) {
            let raw = raw.trim();
            if !raw.is_empty() {
                config.android_package = Some(raw.to_string());
            }
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        message: message.into(),
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(key, raw, e.to_string()))?;
    if secs == 0 {
        return Err(invalid(key, raw, "must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

mod seconds {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Err(D::Error::custom("must be at least one second")),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_production_ios() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.environment.is_production());
        assert_eq!(config.validation_timeout, Duration::from_secs(30));
        assert_eq!(config.pending_ttl, Duration::from_secs(900));
    }

    #[test]
    fn variables_override_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_ENVIRONMENT, "dev"),
            (ENV_PLATFORM, "android"),
            (ENV_VALIDATION_TIMEOUT_SECS, "5"),
            (ENV_PENDING_TTL_SECS, " 60 "),
            (ENV_ANDROID_PACKAGE, "com.example.app"),
        ]))
        .unwrap();

        assert_eq!(config.environment, BuildEnvironment::Diagnostic);
        assert_eq!(config.platform, Platform::Android);
        assert_eq!(config.validation_timeout, Duration::from_secs(5));
        assert_eq!(config.pending_ttl, Duration::from_secs(60));
        assert_eq!(config.android_package.as_deref(), Some("com.example.app"));
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = EngineConfig::from_lookup(lookup_from(&[(ENV_VALIDATION_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == ENV_VALIDATION_TIMEOUT_SECS));

        assert!(EngineConfig::from_lookup(lookup_from(&[(ENV_PENDING_TTL_SECS, "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[(ENV_PLATFORM, "windows")])).is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"environment":"diagnostic","validation_timeout_secs":2}"#)
                .unwrap();
        assert_eq!(config.environment, BuildEnvironment::Diagnostic);
        assert_eq!(config.validation_timeout, Duration::from_secs(2));
        assert_eq!(config.pending_ttl, Duration::from_secs(900));
    }

    #[test]
    fn zero_durations_are_rejected_when_deserializing() {
        let err = serde_json::from_str::<EngineConfig>(r#"{"validation_timeout_secs":0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("at least one second"));

        assert!(serde_json::from_str::<EngineConfig>(r#"{"pending_ttl_secs":0}"#).is_err());
    }
}
