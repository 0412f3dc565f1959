//! Pod Configuration
//!
//! A pod is described by a small YAML document naming its driver and the
//! raw driver parameters. Parameters stay untyped here; each driver checks
//! them against its declared settings when it is built.
//!
//! ```yaml
//! name: rack-1
//! driver: rsd
//! parameters:
//!   power_address: 10.0.0.5:8443
//!   power_user: admin
//!   power_pass: secret
//! poll:
//!   interval_secs: 2
//!   timeout_secs: 300
//! ```

use crate::compose::PollPolicy;
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_interval() -> u64 {
    2
}

fn default_timeout() -> u64 {
    300
}

fn default_session_timeout() -> u64 {
    30
}

/// Bounds for asynchronous remote work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PollConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

/// One pod and the driver that manages it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PodConfig {
    /// Pod identifier used in logs and metrics
    pub name: String,
    /// Registered driver name (`virsh`, `rsd`)
    pub driver: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub poll: PollConfig,
    /// Login and per-request timeout
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

impl PodConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("pod name must not be empty".into()));
        }
        if self.poll.interval_secs == 0 {
            return Err(Error::Configuration("poll interval must be positive".into()));
        }
        if self.poll.timeout_secs < self.poll.interval_secs {
            return Err(Error::Configuration(format!(
                "poll timeout ({}s) is shorter than the interval ({}s)",
                self.poll.timeout_secs, self.poll.interval_secs
            )));
        }
        if self.session_timeout_secs == 0 {
            return Err(Error::Configuration("session timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll.interval_secs),
            Duration::from_secs(self.poll.timeout_secs),
        )
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}
