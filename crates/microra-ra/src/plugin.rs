//! Router advertisement option plugins.
//!
//! Each configured option kind is a [`Plugin`]: it is prepared once for the
//! interface it advertises on and then applied to every advertisement built
//! for that interface, in configuration order.

use crate::ndp::iface::{is_link_local, AddrsFn, Interface};
use crate::ndp::message::{
    validate_domain_name, DnsSearchList, NdpError, NdpOption, PrefixInformation,
    RecursiveDnsServers, RouterAdvertisement, INFINITY,
};
use ipnet::{IpNet, Ipv6Net};
use microra_core::config::PluginConfig;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::Ipv6Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("failed to fetch IP addresses: {0}")]
    Addrs(#[source] io::Error),

    #[error("prefix {0} has not been prepared for an interface")]
    Unprepared(Ipv6Net),

    #[error(transparent)]
    Option(#[from] NdpError),
}

pub trait Plugin: fmt::Display + Send + Sync {
    /// Short stable name, as used for the `type` key in configuration.
    fn name(&self) -> &'static str;

    /// Human-readable summary of the plugin's settings.
    fn describe(&self) -> String {
        self.to_string()
    }

    /// Bind the plugin to the interface it will advertise on.
    fn prepare(&mut self, ifi: &Interface) -> Result<(), PluginError>;

    /// Apply plugin data to `ra`. `Ok(None)` aborts the advertisement.
    fn apply(&self, ra: RouterAdvertisement) -> Result<Option<RouterAdvertisement>, PluginError>;
}

/// Create the plugin described by one configuration entry.
pub fn from_config(cfg: &PluginConfig) -> Box<dyn Plugin> {
    match cfg {
        PluginConfig::Prefix(p) => Box::new(Prefix {
            prefix: p.prefix,
            on_link: p.on_link,
            autonomous: p.autonomous,
            valid_lifetime: p.valid_lifetime.into(),
            preferred_lifetime: p.preferred_lifetime.into(),
            addrs: None,
        }),
        PluginConfig::Mtu { mtu } => Box::new(Mtu(*mtu)),
        PluginConfig::Rdnss(r) => Box::new(Rdnss {
            lifetime: r.lifetime.into(),
            servers: r.servers.clone(),
        }),
        PluginConfig::Dnssl(d) => Box::new(Dnssl {
            lifetime: d.lifetime.into(),
            domain_names: d.domain_names.clone(),
        }),
    }
}

/// DNS Search List option (RFC 8106).
#[derive(Debug, Clone)]
pub struct Dnssl {
    pub lifetime: Duration,
    pub domain_names: Vec<String>,
}

impl fmt::Display for Dnssl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "domain names: [{}], lifetime: {}",
            self.domain_names.join(", "),
            lifetime_str(self.lifetime)
        )
    }
}

impl Plugin for Dnssl {
    fn name(&self) -> &'static str {
        "dnssl"
    }

    fn prepare(&mut self, _ifi: &Interface) -> Result<(), PluginError> {
        Ok(())
    }

    fn apply(&self, mut ra: RouterAdvertisement) -> Result<Option<RouterAdvertisement>, PluginError> {
        if self.domain_names.is_empty() {
            return Err(NdpError::NoDomainNames.into());
        }
        for name in &self.domain_names {
            validate_domain_name(name)?;
        }

        ra.options.push(NdpOption::DnsSearchList(DnsSearchList {
            lifetime: self.lifetime,
            domain_names: self.domain_names.clone(),
        }));
        Ok(Some(ra))
    }
}

/// MTU option.
#[derive(Debug, Clone, Copy)]
pub struct Mtu(pub u32);

impl fmt::Display for Mtu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MTU: {}", self.0)
    }
}

impl Plugin for Mtu {
    fn name(&self) -> &'static str {
        "mtu"
    }

    fn prepare(&mut self, _ifi: &Interface) -> Result<(), PluginError> {
        Ok(())
    }

    fn apply(&self, mut ra: RouterAdvertisement) -> Result<Option<RouterAdvertisement>, PluginError> {
        ra.options.push(NdpOption::Mtu(self.0));
        Ok(Some(ra))
    }
}

/// Prefix Information option. A `::/N` prefix expands at apply time to
/// every /N network assigned to the interface.
#[derive(Clone)]
pub struct Prefix {
    pub prefix: Ipv6Net,
    pub on_link: bool,
    pub autonomous: bool,
    pub valid_lifetime: Duration,
    pub preferred_lifetime: Duration,
    addrs: Option<AddrsFn>,
}

impl Prefix {
    /// A prefix with radvd's defaults: on-link, autonomous, valid for 24h
    /// and preferred for 4h.
    pub fn new(prefix: Ipv6Net) -> Self {
        Self {
            prefix,
            on_link: true,
            autonomous: true,
            valid_lifetime: Duration::from_secs(24 * 60 * 60),
            preferred_lifetime: Duration::from_secs(4 * 60 * 60),
            addrs: None,
        }
    }

    /// The prefixes this plugin advertises right now.
    fn prefixes(&self) -> Result<Vec<Ipv6Addr>, PluginError> {
        if self.prefix.addr() != Ipv6Addr::UNSPECIFIED {
            return Ok(vec![self.prefix.addr()]);
        }

        let addrs = self
            .addrs
            .as_ref()
            .ok_or(PluginError::Unprepared(self.prefix))?;
        let length = self.prefix.prefix_len();

        let mut seen = HashSet::new();
        let mut prefixes = Vec::new();
        for net in addrs().map_err(PluginError::Addrs)? {
            let net = match net {
                IpNet::V6(net) => net,
                IpNet::V4(_) => continue,
            };
            // RFC 4861 section 4.6.2: never advertise link-local prefixes.
            if is_link_local(&net.addr()) || net.prefix_len() != length {
                continue;
            }

            let network = net.network();
            if seen.insert(network) {
                prefixes.push(network);
            }
        }

        Ok(prefixes)
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefix")
            .field("prefix", &self.prefix)
            .field("on_link", &self.on_link)
            .field("autonomous", &self.autonomous)
            .field("valid_lifetime", &self.valid_lifetime)
            .field("preferred_lifetime", &self.preferred_lifetime)
            .field("prepared", &self.addrs.is_some())
            .finish()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.on_link {
            flags.push("on-link");
        }
        if self.autonomous {
            flags.push("autonomous");
        }

        write!(
            f,
            "{} [{}], preferred: {}, valid: {}",
            self.prefix,
            flags.join(", "),
            lifetime_str(self.preferred_lifetime),
            lifetime_str(self.valid_lifetime)
        )
    }
}

impl Plugin for Prefix {
    fn name(&self) -> &'static str {
        "prefix"
    }

    fn prepare(&mut self, ifi: &Interface) -> Result<(), PluginError> {
        self.addrs = Some(ifi.addrs_fn());
        Ok(())
    }

    fn apply(&self, mut ra: RouterAdvertisement) -> Result<Option<RouterAdvertisement>, PluginError> {
        // Every prefix expanded from ::/N shares this plugin's settings.
        for prefix in self.prefixes()? {
            ra.options.push(NdpOption::PrefixInformation(PrefixInformation {
                prefix_length: self.prefix.prefix_len(),
                on_link: self.on_link,
                autonomous_address_configuration: self.autonomous,
                valid_lifetime: self.valid_lifetime,
                preferred_lifetime: self.preferred_lifetime,
                prefix,
            }));
        }
        Ok(Some(ra))
    }
}

/// Recursive DNS Server option (RFC 8106).
#[derive(Debug, Clone)]
pub struct Rdnss {
    pub lifetime: Duration,
    pub servers: Vec<Ipv6Addr>,
}

impl fmt::Display for Rdnss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let servers: Vec<String> = self.servers.iter().map(|s| s.to_string()).collect();
        write!(
            f,
            "servers: [{}], lifetime: {}",
            servers.join(", "),
            lifetime_str(self.lifetime)
        )
    }
}

impl Plugin for Rdnss {
    fn name(&self) -> &'static str {
        "rdnss"
    }

    fn prepare(&mut self, _ifi: &Interface) -> Result<(), PluginError> {
        Ok(())
    }

    fn apply(&self, mut ra: RouterAdvertisement) -> Result<Option<RouterAdvertisement>, PluginError> {
        if self.servers.is_empty() {
            return Err(NdpError::NoServers.into());
        }

        ra.options.push(NdpOption::RecursiveDnsServers(RecursiveDnsServers {
            lifetime: self.lifetime,
            servers: self.servers.clone(),
        }));
        Ok(Some(ra))
    }
}

/// Render a lifetime, recognizing the infinity sentinel.
pub fn lifetime_str(d: Duration) -> String {
    if d == INFINITY {
        "infinite".to_string()
    } else {
        format_duration(d)
    }
}

/// Format a duration as hours, minutes and seconds, e.g. "1h30m0s" or
/// "1.5s"; sub-second values use "ms", "µs" or "ns".
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return fractional(nanos, 1_000, 3, "µs");
    }
    if nanos < 1_000_000_000 {
        return fractional(nanos, 1_000_000, 6, "ms");
    }

    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let secs = fractional(s as u128 * 1_000_000_000 + d.subsec_nanos() as u128, 1_000_000_000, 9, "s");

    if h > 0 {
        format!("{h}h{m}m{secs}")
    } else if m > 0 {
        format!("{m}m{secs}")
    } else {
        secs
    }
}

fn fractional(value: u128, unit: u128, digits: usize, suffix: &str) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return format!("{whole}{suffix}");
    }
    let frac = format!("{frac:0digits$}");
    format!("{whole}.{}{suffix}", frac.trim_end_matches('0'))
}
