use ipnet::IpNet;
use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

/// Enumerates the addresses currently assigned to one interface.
pub type AddrsFn = Arc<dyn Fn() -> io::Result<Vec<IpNet>> + Send + Sync>;

/// A resolved network interface.
#[derive(Clone)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub hardware_addr: Option<MacAddr>,
    addrs: AddrsFn,
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("hardware_addr", &self.hardware_addr)
            .finish_non_exhaustive()
    }
}

impl Interface {
    pub fn new(name: &str, index: u32, hardware_addr: Option<MacAddr>, addrs: AddrsFn) -> Self {
        Self {
            name: name.to_string(),
            index,
            hardware_addr,
            addrs,
        }
    }

    /// Resolve an interface by name. Its addresses are re-read from the
    /// system on every call to [`Interface::addrs`].
    pub fn by_name(name: &str) -> io::Result<Self> {
        let ifi = find(name)?;
        let lookup = name.to_string();

        Ok(Self {
            name: ifi.name.clone(),
            index: ifi.index,
            hardware_addr: ifi.mac.filter(|mac| *mac != MacAddr::zero()),
            addrs: Arc::new(move || find(&lookup).map(|ifi| to_ipnets(&ifi))),
        })
    }

    pub fn addrs(&self) -> io::Result<Vec<IpNet>> {
        (self.addrs)()
    }

    /// The address enumeration capability, for plugins that need it.
    pub fn addrs_fn(&self) -> AddrsFn {
        self.addrs.clone()
    }

    /// First IPv6 link-local unicast address on the interface.
    pub fn link_local(&self) -> io::Result<Ipv6Addr> {
        self.addrs()?
            .into_iter()
            .find_map(|net| match net.addr() {
                IpAddr::V6(ip) if is_link_local(&ip) => Some(ip),
                _ => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no IPv6 link-local address on {}", self.name),
                )
            })
    }
}

/// fe80::/10
pub fn is_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}

fn find(name: &str) -> io::Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|ifi| ifi.name == name)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such network interface {name:?}"),
            )
        })
}

fn to_ipnets(ifi: &NetworkInterface) -> Vec<IpNet> {
    ifi.ips
        .iter()
        .filter_map(|n| IpNet::new(n.ip(), n.prefix()).ok())
        .collect()
}
