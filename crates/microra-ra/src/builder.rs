use crate::ndp::iface::Interface;
use crate::ndp::message::{NdpError, Preference, RouterAdvertisement};
use crate::plugin::{self, Plugin, PluginError};
use microra_core::config::InterfaceConfig;
use std::time::Duration;
use thiserror::Error;

/// RFC 4861 router lifetime is a 16-bit count of seconds.
const MAX_ROUTER_LIFETIME: Duration = Duration::from_secs(u16::MAX as u64);

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid router preference: {0}")]
    Preference(#[source] NdpError),

    #[error("router lifetime {0:?} exceeds 65535 seconds")]
    RouterLifetime(Duration),

    #[error("failed to prepare plugin {plugin:?}: {source}")]
    Prepare {
        plugin: &'static str,
        #[source]
        source: PluginError,
    },

    #[error("failed to apply plugin {plugin:?}: {source}")]
    Plugin {
        plugin: &'static str,
        #[source]
        source: PluginError,
    },
}

/// Assembles router advertisements from interface configuration and an
/// ordered list of option plugins.
pub struct Builder {
    plugins: Vec<Box<dyn Plugin>>,
}

impl Builder {
    pub fn new(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// Builder with the plugins listed in `cfg`, in order. Plugins are not
    /// yet prepared.
    pub fn from_config(cfg: &InterfaceConfig) -> Self {
        Self::new(cfg.plugins.iter().map(plugin::from_config).collect())
    }

    /// Bind every plugin to `ifi`.
    pub fn prepare(&mut self, ifi: &Interface) -> Result<(), BuildError> {
        for p in &mut self.plugins {
            p.prepare(ifi).map_err(|source| BuildError::Prepare {
                plugin: p.name(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn plugins(&self) -> &[Box<dyn Plugin>] {
        &self.plugins
    }

    /// Build one advertisement. `Ok(None)` means a plugin asked for this
    /// advertisement to be skipped.
    pub fn build(&self, cfg: &InterfaceConfig) -> Result<Option<RouterAdvertisement>, BuildError> {
        let preference: Preference = cfg.preference.parse().map_err(BuildError::Preference)?;

        let router_lifetime = cfg.default_lifetime();
        if router_lifetime > MAX_ROUTER_LIFETIME {
            return Err(BuildError::RouterLifetime(router_lifetime));
        }

        let mut ra = RouterAdvertisement {
            current_hop_limit: cfg.hop_limit,
            managed_configuration: cfg.managed,
            other_configuration: cfg.other_config,
            mobile_ipv6_home_agent: cfg.home_agent,
            router_selection_preference: preference,
            neighbor_discovery_proxy: cfg.proxy,
            router_lifetime,
            reachable_time: cfg.reachable_time(),
            retransmit_timer: cfg.retransmit_timer(),
            options: Vec::new(),
        };

        for p in &self.plugins {
            match p.apply(ra) {
                Ok(Some(next)) => ra = next,
                Ok(None) => return Ok(None),
                Err(source) => {
                    return Err(BuildError::Plugin {
                        plugin: p.name(),
                        source,
                    })
                }
            }
        }

        Ok(Some(ra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndp::message::{NdpOption, PrefixInformation, RecursiveDnsServers};
    use crate::plugin::{Mtu, Prefix, Rdnss};
    use pnet::util::MacAddr;
    use std::fmt;
    use std::net::Ipv6Addr;
    use std::sync::Arc;

    fn interface() -> Interface {
        Interface::new(
            "test0",
            1,
            Some(MacAddr(0x02, 0, 0, 0, 0, 1)),
            Arc::new(|| {
                Ok(vec![
                    "fe80::1/64".parse().unwrap(),
                    "2001:db8::1/64".parse().unwrap(),
                ])
            }),
        )
    }

    struct Abort;

    impl fmt::Display for Abort {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("abort")
        }
    }

    impl Plugin for Abort {
        fn name(&self) -> &'static str {
            "abort"
        }

        fn prepare(&mut self, _ifi: &Interface) -> Result<(), PluginError> {
            Ok(())
        }

        fn apply(&self, _ra: RouterAdvertisement) -> Result<Option<RouterAdvertisement>, PluginError> {
            Ok(None)
        }
    }

    #[test]
    fn test_build_end_to_end() {
        let mut cfg = InterfaceConfig::new("test0");
        cfg.default_lifetime_secs = 30 * 60;
        cfg.reachable_time_ms = 12345;

        let mut builder = Builder::new(vec![
            Box::new(Prefix::new("::/64".parse().unwrap())),
            Box::new(Mtu(1500)),
            Box::new(Rdnss {
                lifetime: Duration::from_secs(600),
                servers: vec!["2001:db8::53".parse().unwrap()],
            }),
        ]);
        builder.prepare(&interface()).unwrap();

        let ra = builder.build(&cfg).unwrap().unwrap();
        let want = RouterAdvertisement {
            current_hop_limit: 64,
            router_selection_preference: Preference::Medium,
            router_lifetime: Duration::from_secs(1800),
            reachable_time: Duration::from_millis(12345),
            options: vec![
                NdpOption::PrefixInformation(PrefixInformation {
                    prefix_length: 64,
                    on_link: true,
                    autonomous_address_configuration: true,
                    valid_lifetime: Duration::from_secs(24 * 60 * 60),
                    preferred_lifetime: Duration::from_secs(4 * 60 * 60),
                    prefix: "2001:db8::".parse::<Ipv6Addr>().unwrap(),
                }),
                NdpOption::Mtu(1500),
                NdpOption::RecursiveDnsServers(RecursiveDnsServers {
                    lifetime: Duration::from_secs(600),
                    servers: vec!["2001:db8::53".parse().unwrap()],
                }),
            ],
            ..Default::default()
        };
        assert_eq!(ra, want);
    }

    #[test]
    fn test_build_without_options() {
        let mut cfg = InterfaceConfig::new("eth0");
        cfg.advertise = true;
        cfg.default_lifetime_secs = 30 * 60;
        cfg.reachable_time_ms = 12345;

        let ra = Builder::from_config(&cfg).build(&cfg).unwrap().unwrap();
        assert_eq!(ra.current_hop_limit, 64);
        assert_eq!(ra.router_lifetime.as_secs(), 1800);
        assert_eq!(ra.reachable_time.as_millis(), 12345);
        assert_eq!(ra.router_selection_preference.to_string(), "medium");
        assert!(ra.options.is_empty());
    }

    #[test]
    fn test_build_is_repeatable() {
        let mut cfg = InterfaceConfig::new("test0");
        cfg.managed = true;
        cfg.preference = "high".into();

        let builder = Builder::new(vec![Box::new(Mtu(1280))]);
        let first = builder.build(&cfg).unwrap();
        let second = builder.build(&cfg).unwrap();
        assert_eq!(first, second);

        let ra = first.unwrap();
        assert!(ra.managed_configuration);
        assert_eq!(ra.router_selection_preference, Preference::High);
    }

    #[test]
    fn test_build_rejects_bad_preference() {
        let mut cfg = InterfaceConfig::new("test0");
        cfg.preference = "urgent".into();

        let err = Builder::new(Vec::new()).build(&cfg).unwrap_err();
        assert!(matches!(err, BuildError::Preference(_)));
    }

    #[test]
    fn test_build_rejects_long_router_lifetime() {
        let mut cfg = InterfaceConfig::new("test0");
        cfg.default_lifetime_secs = 70_000;

        let err = Builder::new(Vec::new()).build(&cfg).unwrap_err();
        assert!(matches!(err, BuildError::RouterLifetime(_)));
    }

    #[test]
    fn test_build_names_failing_plugin() {
        let cfg = InterfaceConfig::new("test0");
        let builder = Builder::new(vec![
            Box::new(Mtu(1500)),
            Box::new(Rdnss {
                lifetime: Duration::from_secs(600),
                servers: Vec::new(),
            }),
        ]);

        match builder.build(&cfg) {
            Err(BuildError::Plugin { plugin, .. }) => assert_eq!(plugin, "rdnss"),
            other => panic!("expected plugin error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_aborted_by_plugin() {
        let cfg = InterfaceConfig::new("test0");
        let builder = Builder::new(vec![Box::new(Mtu(1500)), Box::new(Abort)]);
        assert_eq!(builder.build(&cfg).unwrap(), None);
    }

    #[test]
    fn test_from_config_preserves_order() {
        let cfg: InterfaceConfig = toml::from_str(
            r#"
name = "eth0"

[[plugins]]
type = "mtu"
mtu = 1500

[[plugins]]
type = "dnssl"
domain_names = ["lan"]

[[plugins]]
type = "prefix"
prefix = "::/64"
"#,
        )
        .unwrap();

        let builder = Builder::from_config(&cfg);
        let names: Vec<&str> = builder.plugins().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["mtu", "dnssl", "prefix"]);
    }
}
