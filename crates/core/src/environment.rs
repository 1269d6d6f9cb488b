//! Build environment and platform flags.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Build flavor the client runs as.
///
/// `Diagnostic` is the non-production flavor used with local store test
/// configurations. It validates against the sandbox backend and tolerates
/// `InvalidReceiptData` verdicts for local test receipts. It must never be the
/// flavor of a released build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildEnvironment {
    #[default]
    Production,
    Diagnostic,
}

impl BuildEnvironment {
    pub fn is_production(self) -> bool {
        self == BuildEnvironment::Production
    }

    /// Sandbox flag passed to the receipt validator.
    pub fn uses_sandbox(self) -> bool {
        !self.is_production()
    }

    /// Whether an `InvalidReceiptData` verdict still grants the entitlement.
    pub fn grants_invalid_receipts(self) -> bool {
        self == BuildEnvironment::Diagnostic
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildEnvironment::Production => "production",
            BuildEnvironment::Diagnostic => "diagnostic",
        }
    }
}

impl FromStr for BuildEnvironment {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "release" => Ok(BuildEnvironment::Production),
            "diagnostic" | "development" | "dev" | "debug" => Ok(BuildEnvironment::Diagnostic),
            other => Err(DomainError::invalid_value(
                "build environment",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

impl core::fmt::Display for BuildEnvironment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mobile platform hosting the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl FromStr for Platform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(DomainError::invalid_value(
                "platform",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

impl core::fmt::Display for Platform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
