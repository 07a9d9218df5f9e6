use crate::error::{Error, Result};
use crate::types::Lifetime;
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::time::Duration;

/// RFC 4861 section 6.2.1 upper bound for AdvDefaultLifetime.
pub const MAX_DEFAULT_LIFETIME_SECS: u64 = 9000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-interface router advertisement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default)]
    pub advertise: bool,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub other_config: bool,
    #[serde(default)]
    pub home_agent: bool,
    #[serde(default)]
    pub proxy: bool,
    /// Router selection preference: "low", "medium" or "high".
    #[serde(default = "default_preference")]
    pub preference: String,
    #[serde(default = "default_router_lifetime")]
    pub default_lifetime_secs: u64,
    #[serde(default)]
    pub reachable_time_ms: u64,
    #[serde(default)]
    pub retransmit_timer_ms: u64,
    /// Interval between unsolicited advertisements.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Option plugins, applied in the order listed.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl InterfaceConfig {
    /// Minimal configuration for `name` with every field at its default.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            advertise: false,
            hop_limit: default_hop_limit(),
            managed: false,
            other_config: false,
            home_agent: false,
            proxy: false,
            preference: default_preference(),
            default_lifetime_secs: default_router_lifetime(),
            reachable_time_ms: 0,
            retransmit_timer_ms: 0,
            interval_secs: default_interval(),
            plugins: Vec::new(),
        }
    }

    pub fn default_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_lifetime_secs)
    }

    pub fn reachable_time(&self) -> Duration {
        Duration::from_millis(self.reachable_time_ms)
    }

    pub fn retransmit_timer(&self) -> Duration {
        Duration::from_millis(self.retransmit_timer_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginConfig {
    Prefix(PrefixConfig),
    Mtu { mtu: u32 },
    Rdnss(RdnssConfig),
    Dnssl(DnsslConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixConfig {
    /// A concrete prefix, or `::/N` to advertise every matching /N on the
    /// interface.
    pub prefix: Ipv6Net,
    #[serde(default = "default_true")]
    pub on_link: bool,
    #[serde(default = "default_true")]
    pub autonomous: bool,
    #[serde(default = "default_valid_lifetime")]
    pub valid_lifetime: Lifetime,
    #[serde(default = "default_preferred_lifetime")]
    pub preferred_lifetime: Lifetime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdnssConfig {
    #[serde(default = "default_dns_lifetime")]
    pub lifetime: Lifetime,
    pub servers: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsslConfig {
    #[serde(default = "default_dns_lifetime")]
    pub lifetime: Lifetime,
    pub domain_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_debug_listen")]
    pub listen: String,
    /// Serve Prometheus metrics on `/metrics`.
    #[serde(default)]
    pub prometheus: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_debug_listen(),
            prometheus: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_hop_limit() -> u8 {
    64
}
fn default_preference() -> String {
    "medium".to_string()
}
fn default_router_lifetime() -> u64 {
    1800
}
fn default_interval() -> u64 {
    3
}
fn default_valid_lifetime() -> Lifetime {
    Lifetime::from_secs(24 * 60 * 60)
}
fn default_preferred_lifetime() -> Lifetime {
    Lifetime::from_secs(4 * 60 * 60)
}
fn default_dns_lifetime() -> Lifetime {
    Lifetime::from_secs(1800)
}
fn default_debug_listen() -> String {
    "127.0.0.1:9430".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for ifi in &self.interfaces {
            if ifi.name.is_empty() {
                return Err(Error::Config("interface name must not be empty".into()));
            }
            if !seen.insert(ifi.name.as_str()) {
                return Err(Error::Config(format!("duplicate interface {:?}", ifi.name)));
            }
            ifi.validate()?;
        }
        Ok(())
    }
}

impl InterfaceConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::Interface {
            interface: self.name.clone(),
            reason,
        };

        if self.interval_secs == 0 {
            return Err(invalid("interval_secs must be greater than zero".into()));
        }
        if self.default_lifetime_secs > MAX_DEFAULT_LIFETIME_SECS {
            return Err(invalid(format!(
                "default_lifetime_secs {} exceeds {MAX_DEFAULT_LIFETIME_SECS}",
                self.default_lifetime_secs
            )));
        }
        if self.reachable_time_ms > u32::MAX as u64 || self.retransmit_timer_ms > u32::MAX as u64 {
            return Err(invalid("timer values must fit in 32 bits".into()));
        }

        for plugin in &self.plugins {
            match plugin {
                PluginConfig::Prefix(p) => {
                    if p.prefix != p.prefix.trunc() {
                        return Err(invalid(format!("prefix {} is not a CIDR prefix", p.prefix)));
                    }
                    if p.preferred_lifetime.as_duration() > p.valid_lifetime.as_duration() {
                        return Err(invalid(format!(
                            "prefix {}: preferred lifetime exceeds valid lifetime",
                            p.prefix
                        )));
                    }
                }
                PluginConfig::Rdnss(r) if r.servers.is_empty() => {
                    return Err(invalid("rdnss requires at least one server".into()));
                }
                PluginConfig::Dnssl(d) if d.domain_names.is_empty() => {
                    return Err(invalid("dnssl requires at least one domain name".into()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
