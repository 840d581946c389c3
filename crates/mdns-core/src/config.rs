//! Configuration types for the mDNS publication engine
//!
//! This module defines all configuration structures used throughout the crate.
//! Every value has a default matching the command-line defaults of `mdnsd`.

use serde::{Deserialize, Serialize};

use crate::labels::is_valid_hostname;

/// Smallest accepted record TTL (seconds)
pub const MIN_TTL_SECS: u32 = 1;
/// Largest accepted record TTL (seconds, one day)
pub const MAX_TTL_SECS: u32 = 86_400;
/// Smallest accepted wait between scans (seconds)
pub const MIN_WAIT_SECS: u64 = 1;
/// Largest accepted wait between scans (seconds, one hour)
pub const MAX_WAIT_SECS: u64 = 3_600;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// Container source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Name-service configuration
    #[serde(default)]
    pub name_service: NameServiceConfig,

    /// Publication policy
    #[serde(default)]
    pub publish: PublishConfig,

    /// Hostnames published in addition to the container-derived ones
    #[serde(default)]
    pub static_domains: Vec<String>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl MdnsConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            source: SourceConfig::default(),
            name_service: NameServiceConfig::default(),
            publish: PublishConfig::default(),
            static_domains: Vec::new(),
            engine: EngineConfig::default(),
        }
    }

    /// Add static hostnames (lower-cased)
    pub fn with_static_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_domains
            .extend(domains.into_iter().map(|d| d.into().trim().to_lowercase()));
        self
    }

    /// Validate the configuration
    ///
    /// Any error returned here is fatal: the daemon refuses to start.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.publish.validate()?;
        self.engine.validate()?;
        self.source.validate()?;

        for domain in &self.static_domains {
            validate_static_domain(domain)?;
        }

        Ok(())
    }
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Static hostnames must be `.local` names; label-derived ones only need to be valid DNS names.
pub fn validate_static_domain(domain: &str) -> Result<(), crate::Error> {
    let Some(stem) = domain.strip_suffix(".local") else {
        return Err(crate::Error::config(format!(
            "Invalid domain format: {}. Must be in format 'name.local'",
            domain
        )));
    };

    if stem.is_empty() || !is_valid_hostname(domain) || domain != domain.to_lowercase() {
        return Err(crate::Error::config(format!(
            "Invalid domain format: {}. Must be in format 'name.local'",
            domain
        )));
    }

    Ok(())
}

/// Container source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Docker Engine API
    Docker {
        /// Engine address (`unix:///var/run/docker.sock` or `tcp://host:port`)
        host: Option<String>,
    },

    /// Custom container source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SourceConfig {
    /// Validate the source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Docker { host: Some(host) } => {
                if !(host.starts_with("unix://") || host.starts_with("tcp://")) {
                    return Err(crate::Error::config(format!(
                        "Docker host must use unix:// or tcp:// scheme, got {}",
                        host
                    )));
                }
                Ok(())
            }
            SourceConfig::Docker { host: None } => Ok(()),
            SourceConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom container source factory cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the source type name used by the registry
    pub fn type_name(&self) -> &str {
        match self {
            SourceConfig::Docker { .. } => "docker",
            SourceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Docker { host: None }
    }
}

/// Name-service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NameServiceConfig {
    /// Avahi over the system D-Bus
    #[default]
    Avahi,

    /// Custom name service
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl NameServiceConfig {
    /// Get the name-service type name used by the registry
    pub fn type_name(&self) -> &str {
        match self {
            NameServiceConfig::Avahi => "avahi",
            NameServiceConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Publication policy flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// TTL of every published record, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u32,

    /// Wait between two scans, in seconds
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Publish containers unless they opt out (`false` = opt-in only)
    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,

    /// Withdraw records whose hostname is no longer desired
    #[serde(default)]
    pub reset: bool,

    /// Skip collision probing entirely.
    ///
    /// Much faster, but if another host already publishes the name the
    /// daemon may be left in an inconsistent state.
    #[serde(default)]
    pub force: bool,
}

impl PublishConfig {
    /// Validate TTL and wait ranges
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(&self.ttl_secs) {
            return Err(crate::Error::config(format!(
                "TTL must be between {} and {} seconds, got {}",
                MIN_TTL_SECS, MAX_TTL_SECS, self.ttl_secs
            )));
        }

        if !(MIN_WAIT_SECS..=MAX_WAIT_SECS).contains(&self.wait_secs) {
            return Err(crate::Error::config(format!(
                "Wait time must be between {} and {} seconds, got {}",
                MIN_WAIT_SECS, MAX_WAIT_SECS, self.wait_secs
            )));
        }

        Ok(())
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            wait_secs: default_wait_secs(),
            enabled_by_default: default_enabled(),
            reset: false,
            force: false,
        }
    }
}

fn default_ttl_secs() -> u32 {
    60
}

fn default_wait_secs() -> u64 {
    5
}

fn default_enabled() -> bool {
    true
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Collision retries (probe + add) before a hostname is held
    ///
    /// A held hostname is only re-probed on later ticks and published again
    /// once the competing record has disappeared.
    #[serde(default = "default_max_collision_retries")]
    pub max_collision_retries: u32,

    /// Upper bound for the withdraw-all pass on shutdown (in seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Capacity of the collision notice queue drained at each tick
    #[serde(default = "default_collision_queue_capacity")]
    pub collision_queue_capacity: usize,
}

impl EngineConfig {
    /// Validate channel capacities and timeouts
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.collision_queue_capacity == 0 {
            return Err(crate::Error::config("Collision queue capacity must be > 0"));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(crate::Error::config("Shutdown timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_collision_retries: default_max_collision_retries(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            collision_queue_capacity: default_collision_queue_capacity(),
        }
    }
}

fn default_max_collision_retries() -> u32 {
    3
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_collision_queue_capacity() -> usize {
    64
}
