//! # Engine Configuration

use crate::error::{FgscError, Result};
use serde::{Deserialize, Serialize};

/// Knobs for [`MessageEngine`](crate::engine::MessageEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Let rules try inverse-based fast paths before their general form.
    pub fast_path_inversion: bool,
    /// Reject improper inbound distributions before dispatching a rule.
    pub check_inbound_propriety: bool,
    /// Default replay count for [`MessageEngine::iterate`](crate::engine::MessageEngine::iterate).
    pub iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_path_inversion: true,
            check_inbound_propriety: true,
            iterations: 1,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| FgscError::Config(e.to_string()))?;
        config.validate()
    }

    pub fn validate(self) -> Result<Self> {
        if self.iterations == 0 {
            return Err(FgscError::Config("iterations must be > 0".into()));
        }
        Ok(self)
    }
}
