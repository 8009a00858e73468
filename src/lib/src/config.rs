//! Configuration for package verification

use crate::certificate::DistinguishedName;
use crate::PSError;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Entry whose signature stands in for the whole package.
pub const DEFAULT_MARKER_ENTRY: &str = "classes.dex";

/// Subject of the certificate that signs development builds.
pub const DEBUG_IDENTITY: &str = "CN=Android Debug,O=Android,C=US";

/// Configuration for package verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Archive entry that must be present and signed
    pub marker_entry: String,

    /// Subject name identifying a debug-signed host, in RFC 4514 form
    pub debug_identity: String,

    /// Accept every package when the host itself is debug-signed
    pub allow_debug_bypass: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            marker_entry: DEFAULT_MARKER_ENTRY.to_string(),
            debug_identity: DEBUG_IDENTITY.to_string(),
            allow_debug_bypass: true,
        }
    }
}

impl VerifierConfig {
    /// Create config that verifies even on debug-signed hosts
    pub fn strict() -> Self {
        Self {
            allow_debug_bypass: false,
            ..Self::default()
        }
    }

    /// Set the marker entry
    pub fn with_marker_entry(mut self, entry: impl Into<String>) -> Self {
        self.marker_entry = entry.into();
        self
    }

    /// Set the debug identity
    pub fn with_debug_identity(mut self, identity: impl Into<String>) -> Self {
        self.debug_identity = identity.into();
        self
    }

    /// Enable or disable the debug bypass
    pub fn with_debug_bypass(mut self, allow: bool) -> Self {
        self.allow_debug_bypass = allow;
        self
    }

    pub fn debug_identity_name(&self) -> Result<DistinguishedName, PSError> {
        DistinguishedName::parse(&self.debug_identity)
    }

    pub fn from_json(json: &str) -> Result<Self, PSError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PSError::ConfigError(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PSError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            PSError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, PSError> {
        serde_json::to_string_pretty(self).map_err(|e| PSError::ConfigError(e.to_string()))
    }

    fn validate(&self) -> Result<(), PSError> {
        if self.marker_entry.is_empty() || self.marker_entry.ends_with('/') {
            return Err(PSError::ConfigError(format!(
                "Invalid marker entry {:?}",
                self.marker_entry
            )));
        }
        self.debug_identity_name()
            .map_err(|e| PSError::ConfigError(e.to_string()))?;
        Ok(())
    }
}
