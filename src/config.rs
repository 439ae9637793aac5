//! Engine run configuration

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use url::Url;

/// Configuration for one engine run
///
/// Immutable once a run starts; changing anything requires stop + update +
/// start. The control plane hands this struct over already deserialized —
/// the engine never parses wire formats itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL all simulated traffic is aimed at
    pub target_url: String,

    /// Connect to this IP instead of resolving the target host, while
    /// preserving the original Host header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_override: Option<IpAddr>,

    /// Header name used to carry each session's simulated source IP
    pub xff_header_name: String,

    /// Maximum number of requests in flight across all sessions
    pub rate_limit: usize,

    /// Target number of concurrently active sessions
    pub simulated_users: usize,

    /// Minimum planned session length, seconds
    pub min_session_secs: u64,

    /// Maximum planned session length, seconds
    pub max_session_secs: u64,

    /// Enable per-request debug logging
    #[serde(default)]
    pub debug: bool,
}

impl EngineConfig {
    /// Validate the configuration
    ///
    /// Fails fast with the first violation found; the engine never spawns
    /// anything for an invalid config.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.parse_target()?;

        if self.rate_limit == 0 {
            return Err(ValidationError::NotPositive {
                field: "rate_limit",
            });
        }
        if self.simulated_users == 0 {
            return Err(ValidationError::NotPositive {
                field: "simulated_users",
            });
        }
        if self.min_session_secs == 0
            || self.max_session_secs == 0
            || self.min_session_secs > self.max_session_secs
        {
            return Err(ValidationError::SessionBounds {
                min: self.min_session_secs,
                max: self.max_session_secs,
            });
        }

        Ok(())
    }

    /// Parse the target URL, requiring a host
    pub fn parse_target(&self) -> Result<Url, ValidationError> {
        let url = Url::parse(&self.target_url).map_err(|e| ValidationError::TargetUrl {
            url: self.target_url.clone(),
            reason: e.to_string(),
        })?;
        if url.host_str().is_none() {
            return Err(ValidationError::TargetUrl {
                url: self.target_url.clone(),
                reason: "missing host".into(),
            });
        }
        Ok(url)
    }
}
