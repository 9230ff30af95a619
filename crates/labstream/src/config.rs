// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LabStream global configuration - single source of truth.
//!
//! This module centralizes the protocol constants and the runtime settings
//! (`ApiConfig`). Settings come from, in order of precedence:
//!
//! 1. Content installed via [`set_config_content`] (must happen before the
//!    first call to [`ApiConfig::global`]),
//! 2. the file installed via [`set_config_filename`],
//! 3. the file `labstream.cfg` in the current working directory,
//! 4. built-in defaults.
//!
//! Resolvers take an injected `Arc<ApiConfig>` internally, so tests construct
//! their own instance and never touch the process-wide one.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

// =======================================================================
// Protocol constants
// =======================================================================

/// Lowest port used to serve streams and service information.
///
/// Up to `port_range` successively higher ports may be in use on one
/// machine, one per served stream.
pub const DEFAULT_BASE_PORT: u16 = 16572;

/// Number of ports available for serving streams on one machine.
pub const DEFAULT_PORT_RANGE: u16 = 32;

/// Port over which multicast discovery traffic is exchanged.
pub const DEFAULT_MULTICAST_PORT: u16 = 16571;

/// Default name of the configuration file searched in the working directory.
pub const CONFIG_FILENAME: &str = "labstream.cfg";

/// Maximum size of a single discovery datagram (probe or reply).
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Granularity of cancellable waits.
///
/// Pacing sleeps and receive timeouts are split into chunks of this length
/// so that cancellation is observed within one chunk.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Machine-scope discovery addresses (loopback only).
pub const MACHINE_ADDRESSES: &[&str] = &["127.0.0.1", "::1"];

/// Link-local discovery addresses (same subnet, not routed).
///
/// Includes the IPv4 broadcast address so discovery also works on networks
/// with multicast disabled.
pub const LINK_ADDRESSES: &[&str] = &[
    "255.255.255.255",
    "224.0.0.183",
    "ff02:113d:6fdd:2c17:a643:ffe2:1bd1:3cd2",
];

/// Site-scope discovery addresses (routed within a site, TTL permitting).
pub const SITE_ADDRESSES: &[&str] = &[
    "239.255.172.215",
    "ff05:113d:6fdd:2c17:a643:ffe2:1bd1:3cd2",
];

/// Organization-scope discovery addresses.
pub const ORGANIZATION_ADDRESSES: &[&str] = &[
    "239.192.172.215",
    "ff08:113d:6fdd:2c17:a643:ffe2:1bd1:3cd2",
];

/// Global-scope discovery addresses.
pub const GLOBAL_ADDRESSES: &[&str] =
    &["239.255.172.215", "ff0e:113d:6fdd:2c17:a643:ffe2:1bd1:3cd2"];

// =======================================================================
// Runtime configuration
// =======================================================================

/// Runtime configuration for stream providers and recipients.
///
/// The same settings should be used by all machines that take part in a
/// recording session; mismatched scopes or ports lead to streams that are
/// visible on some machines only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// IPv6 handling: "disable" (IPv4 only), "force" (IPv6 only), or
    /// "allow" (both protocol stacks).
    #[serde(default = "default_ipv6")]
    pub ipv6: String,

    /// Lowest port used to provide streams (default: 16572).
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Number of ports, starting at `base_port`, usable for streams.
    #[serde(default = "default_port_range")]
    pub port_range: u16,

    /// Port for multicast announcement and discovery (default: 16571).
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,

    /// Breadth of multicast discovery: "machine", "link", "site",
    /// "organization", or "global".
    #[serde(default = "default_resolve_scope")]
    pub resolve_scope: String,

    /// Extra multicast addresses probed in addition to the scope defaults.
    #[serde(default)]
    pub multicast_addresses: Vec<String>,

    /// TTL override for multicast probes (None: derived from the scope).
    #[serde(default)]
    pub multicast_ttl: Option<u32>,

    /// Known host names that may provide streams. Fallback for networks
    /// where multicast/broadcast discovery fails.
    #[serde(default)]
    pub known_peers: Vec<String>,

    /// Session ID isolating concurrent recording operations from each other.
    #[serde(default = "default_session_id")]
    pub session_id: String,

    /// Minimum assumed round-trip time of a multicast query, in seconds.
    /// The next wave starts no earlier than this.
    #[serde(default = "default_multicast_min_rtt")]
    pub multicast_min_rtt: f64,

    /// Maximum assumed round-trip time of a multicast query, in seconds.
    /// Replies are no longer awaited after this much time.
    #[serde(default = "default_multicast_max_rtt")]
    pub multicast_max_rtt: f64,

    /// Minimum assumed round-trip time of a multi-peer/multi-port unicast
    /// query, in seconds.
    #[serde(default = "default_unicast_min_rtt")]
    pub unicast_min_rtt: f64,

    /// Maximum assumed round-trip time of a multi-peer/multi-port unicast
    /// query, in seconds.
    #[serde(default = "default_unicast_max_rtt")]
    pub unicast_max_rtt: f64,

    /// Extra idle time between waves of a continuous resolve, in seconds.
    /// Added on top of the assumed RTTs.
    #[serde(default = "default_continuous_resolve_interval")]
    pub continuous_resolve_interval: f64,
}

fn default_ipv6() -> String {
    "allow".into()
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_port_range() -> u16 {
    DEFAULT_PORT_RANGE
}

fn default_multicast_port() -> u16 {
    DEFAULT_MULTICAST_PORT
}

fn default_resolve_scope() -> String {
    "site".into()
}

fn default_session_id() -> String {
    "default".into()
}

fn default_multicast_min_rtt() -> f64 {
    0.5
}

fn default_multicast_max_rtt() -> f64 {
    3.0
}

fn default_unicast_min_rtt() -> f64 {
    0.75
}

fn default_unicast_max_rtt() -> f64 {
    5.0
}

fn default_continuous_resolve_interval() -> f64 {
    0.5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            ipv6: default_ipv6(),
            base_port: default_base_port(),
            port_range: default_port_range(),
            multicast_port: default_multicast_port(),
            resolve_scope: default_resolve_scope(),
            multicast_addresses: Vec::new(),
            multicast_ttl: None,
            known_peers: Vec::new(),
            session_id: default_session_id(),
            multicast_min_rtt: default_multicast_min_rtt(),
            multicast_max_rtt: default_multicast_max_rtt(),
            unicast_min_rtt: default_unicast_min_rtt(),
            unicast_max_rtt: default_unicast_max_rtt(),
            continuous_resolve_interval: default_continuous_resolve_interval(),
        }
    }
}

impl ApiConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::ConfigIo(e.to_string()))?;
        Self::from_content(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_content(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        match self.ipv6.as_str() {
            "disable" | "allow" | "force" => {}
            other => {
                return Err(Error::ConfigValue(format!(
                    "ipv6 must be disable/allow/force, got '{}'",
                    other
                )))
            }
        }
        match self.resolve_scope.as_str() {
            "machine" | "link" | "site" | "organization" | "global" => {}
            other => {
                return Err(Error::ConfigValue(format!(
                    "unknown resolve scope '{}'",
                    other
                )))
            }
        }
        if self.port_range == 0 {
            return Err(Error::ConfigValue("port_range cannot be 0".into()));
        }
        if self.multicast_min_rtt <= 0.0 || self.multicast_max_rtt < self.multicast_min_rtt {
            return Err(Error::ConfigValue(
                "multicast RTT bounds must satisfy 0 < min <= max".into(),
            ));
        }
        if self.unicast_min_rtt <= 0.0 || self.unicast_max_rtt < self.unicast_min_rtt {
            return Err(Error::ConfigValue(
                "unicast RTT bounds must satisfy 0 < min <= max".into(),
            ));
        }
        Ok(())
    }

    /// Whether the IPv4 protocol stack may be probed.
    pub fn allow_ipv4(&self) -> bool {
        self.ipv6 != "force"
    }

    /// Whether the IPv6 protocol stack may be probed.
    pub fn allow_ipv6(&self) -> bool {
        self.ipv6 != "disable"
    }

    /// Multicast address list governed by the resolve scope, merged with the
    /// user-supplied extras. Wider scopes include all narrower ones.
    pub fn effective_multicast_addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let scope = self.resolve_scope.as_str();
        out.extend(MACHINE_ADDRESSES.iter().map(|s| (*s).to_string()));
        if matches!(scope, "link" | "site" | "organization" | "global") {
            out.extend(LINK_ADDRESSES.iter().map(|s| (*s).to_string()));
        }
        if matches!(scope, "site" | "organization" | "global") {
            out.extend(SITE_ADDRESSES.iter().map(|s| (*s).to_string()));
        }
        if matches!(scope, "organization" | "global") {
            out.extend(ORGANIZATION_ADDRESSES.iter().map(|s| (*s).to_string()));
        }
        if scope == "global" {
            out.extend(GLOBAL_ADDRESSES.iter().map(|s| (*s).to_string()));
        }
        out.extend(self.multicast_addresses.iter().cloned());
        out.sort();
        out.dedup();
        out
    }

    /// Multicast TTL: the configured override, or a default derived from the
    /// resolve scope (0 = same host .. 255 = unrestricted).
    pub fn effective_multicast_ttl(&self) -> u32 {
        if let Some(ttl) = self.multicast_ttl {
            return ttl.min(255);
        }
        match self.resolve_scope.as_str() {
            "machine" => 0,
            "link" => 1,
            "site" => 24,
            "organization" => 32,
            _ => 255,
        }
    }
}

// =======================================================================
// Process-wide instance
// =======================================================================

static CONFIG_CONTENT: Mutex<Option<String>> = Mutex::new(None);
static CONFIG_FILE: Mutex<Option<String>> = Mutex::new(None);
static GLOBAL: OnceLock<Arc<ApiConfig>> = OnceLock::new();

/// Install configuration content used by [`ApiConfig::global`].
///
/// Takes precedence over any configuration file. Must be called before the
/// first `global()` call to have any effect.
pub fn set_config_content(content: &str) {
    if let Ok(mut slot) = CONFIG_CONTENT.lock() {
        *slot = Some(content.to_string());
    }
}

/// Install the configuration file name used by [`ApiConfig::global`].
///
/// Must be called before the first `global()` call to have any effect.
pub fn set_config_filename(filename: &str) {
    if let Ok(mut slot) = CONFIG_FILE.lock() {
        *slot = Some(filename.to_string());
    }
}

impl ApiConfig {
    /// The process-wide configuration, lazily initialized on first use.
    ///
    /// Resolution order: installed content, installed file name,
    /// `labstream.cfg` in the working directory, built-in defaults. A file
    /// that exists but fails to load is an error; a missing default-location
    /// file is not.
    pub fn global() -> Result<Arc<ApiConfig>> {
        if let Some(cfg) = GLOBAL.get() {
            return Ok(Arc::clone(cfg));
        }
        let loaded = Arc::new(Self::load()?);
        // Another thread may have won the race; the first stored value wins.
        Ok(Arc::clone(GLOBAL.get_or_init(|| loaded)))
    }

    fn load() -> Result<ApiConfig> {
        let content = CONFIG_CONTENT.lock().ok().and_then(|s| s.clone());
        if let Some(content) = content {
            let cfg = Self::from_content(&content)?;
            log::info!("[config] loaded configuration from installed content");
            return Ok(cfg);
        }
        let filename = CONFIG_FILE.lock().ok().and_then(|s| s.clone());
        if let Some(filename) = filename {
            let cfg = Self::from_file(Path::new(&filename))?;
            log::info!("[config] loaded configuration from {}", filename);
            return Ok(cfg);
        }
        let default_path = Path::new(CONFIG_FILENAME);
        if default_path.exists() {
            let cfg = Self::from_file(default_path)?;
            log::info!("[config] loaded configuration from ./{}", CONFIG_FILENAME);
            return Ok(cfg);
        }
        Ok(ApiConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.base_port, 16572);
        assert_eq!(config.multicast_port, 16571);
        assert_eq!(config.resolve_scope, "site");
        assert!(config.allow_ipv4());
        assert!(config.allow_ipv6());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = ApiConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = ApiConfig::from_content(&json).unwrap();
        assert_eq!(config.base_port, parsed.base_port);
        assert_eq!(config.session_id, parsed.session_id);
    }

    #[test]
    fn test_partial_content_uses_defaults() {
        let config = ApiConfig::from_content(r#"{"known_peers": ["lab-pc-1"]}"#).unwrap();
        assert_eq!(config.known_peers, vec!["lab-pc-1"]);
        assert_eq!(config.base_port, DEFAULT_BASE_PORT);
    }

    #[test]
    fn test_ipv6_modes() {
        let mut config = ApiConfig::default();
        config.ipv6 = "disable".into();
        assert!(config.allow_ipv4() && !config.allow_ipv6());
        config.ipv6 = "force".into();
        assert!(!config.allow_ipv4() && config.allow_ipv6());
        config.ipv6 = "both".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scope_merging() {
        let mut config = ApiConfig::default();
        config.resolve_scope = "machine".into();
        let machine = config.effective_multicast_addresses();
        assert_eq!(machine.len(), MACHINE_ADDRESSES.len());
        assert!(machine.contains(&"127.0.0.1".to_string()));

        config.resolve_scope = "link".into();
        let link = config.effective_multicast_addresses();
        assert!(link.contains(&"255.255.255.255".to_string()));
        assert!(machine.iter().all(|a| link.contains(a)), "link includes machine");

        config.resolve_scope = "site".into();
        let site = config.effective_multicast_addresses();
        assert!(link.iter().all(|a| site.contains(a)), "site includes link");

        config.multicast_addresses = vec!["239.1.2.3".into()];
        assert!(config
            .effective_multicast_addresses()
            .contains(&"239.1.2.3".to_string()));
    }

    #[test]
    fn test_scope_ttl() {
        let mut config = ApiConfig::default();
        config.resolve_scope = "machine".into();
        assert_eq!(config.effective_multicast_ttl(), 0);
        config.resolve_scope = "link".into();
        assert_eq!(config.effective_multicast_ttl(), 1);
        config.multicast_ttl = Some(7);
        assert_eq!(config.effective_multicast_ttl(), 7);
    }

    #[test]
    fn test_validation_rtt_bounds() {
        let mut config = ApiConfig::default();
        config.multicast_max_rtt = config.multicast_min_rtt / 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_scope_rejected() {
        let result = ApiConfig::from_content(r#"{"resolve_scope": "galaxy"}"#);
        assert!(result.is_err());
    }
}
