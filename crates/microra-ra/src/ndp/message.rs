pub use pnet::util::MacAddr;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use microra_core::types::INFINITY;

/// ICMPv6 message types
pub const ICMPV6_ROUTER_SOLICITATION: u8 = 133;
pub const ICMPV6_ROUTER_ADVERTISEMENT: u8 = 134;

/// NDP option types
pub const OPT_SOURCE_LL_ADDR: u8 = 1;
pub const OPT_TARGET_LL_ADDR: u8 = 2;
pub const OPT_PREFIX_INFO: u8 = 3;
pub const OPT_MTU: u8 = 5;
pub const OPT_RDNSS: u8 = 25;
pub const OPT_DNSSL: u8 = 31;

pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

const RA_FLAG_MANAGED: u8 = 0x80;
const RA_FLAG_OTHER: u8 = 0x40;
const RA_FLAG_HOME_AGENT: u8 = 0x20;
const RA_FLAG_PROXY: u8 = 0x04;
const PI_FLAG_ON_LINK: u8 = 0x80;
const PI_FLAG_AUTONOMOUS: u8 = 0x40;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NdpError {
    #[error("message too short: {0} bytes")]
    Truncated(usize),

    #[error("unsupported ICMPv6 type {0}")]
    UnsupportedType(u8),

    #[error("invalid length {len} for option type {kind}")]
    OptionLength { kind: u8, len: usize },

    #[error("{field} {value:?} out of range")]
    OutOfRange { field: &'static str, value: Duration },

    #[error("invalid prefix length {0}")]
    PrefixLength(u8),

    #[error("RDNSS option requires at least one server")]
    NoServers,

    #[error("DNSSL option requires at least one domain name")]
    NoDomainNames,

    #[error("invalid domain name {0:?}")]
    DomainName(String),

    #[error("unknown router selection preference {0:?}")]
    Preference(String),
}

/// Router selection preference (RFC 4191 section 2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preference {
    Low,
    #[default]
    Medium,
    High,
}

impl Preference {
    fn bits(self) -> u8 {
        match self {
            Preference::High => 0b01,
            Preference::Medium => 0b00,
            Preference::Low => 0b11,
        }
    }

    /// The reserved value 0b10 is read as medium, as receivers must.
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => Preference::High,
            0b11 => Preference::Low,
            _ => Preference::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Preference::Low => "low",
            Preference::Medium => "medium",
            Preference::High => "high",
        }
    }
}

impl std::fmt::Display for Preference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preference {
    type Err = NdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Preference::Low),
            "medium" => Ok(Preference::Medium),
            "high" => Ok(Preference::High),
            _ => Err(NdpError::Preference(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInformation {
    pub prefix_length: u8,
    pub on_link: bool,
    pub autonomous_address_configuration: bool,
    pub valid_lifetime: Duration,
    pub preferred_lifetime: Duration,
    pub prefix: Ipv6Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveDnsServers {
    pub lifetime: Duration,
    pub servers: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSearchList {
    pub lifetime: Duration,
    pub domain_names: Vec<String>,
}

/// An NDP option. Unrecognized types are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdpOption {
    SourceLinkLayerAddress(MacAddr),
    TargetLinkLayerAddress(MacAddr),
    Mtu(u32),
    PrefixInformation(PrefixInformation),
    RecursiveDnsServers(RecursiveDnsServers),
    DnsSearchList(DnsSearchList),
    Unknown { kind: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouterAdvertisement {
    pub current_hop_limit: u8,
    pub managed_configuration: bool,
    pub other_configuration: bool,
    pub mobile_ipv6_home_agent: bool,
    pub router_selection_preference: Preference,
    pub neighbor_discovery_proxy: bool,
    pub router_lifetime: Duration,
    pub reachable_time: Duration,
    pub retransmit_timer: Duration,
    pub options: Vec<NdpOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouterSolicitation {
    pub options: Vec<NdpOption>,
}

/// The NDP messages a router sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RouterSolicitation(RouterSolicitation),
    RouterAdvertisement(RouterAdvertisement),
}

impl Message {
    /// Parse an ICMPv6 message as delivered by a raw socket (no IPv6 header).
    pub fn parse(data: &[u8]) -> Result<Self, NdpError> {
        if data.len() < 4 {
            return Err(NdpError::Truncated(data.len()));
        }

        // Checksum is verified by the kernel for raw ICMPv6 sockets.
        match data[0] {
            ICMPV6_ROUTER_SOLICITATION => {
                if data.len() < 8 {
                    return Err(NdpError::Truncated(data.len()));
                }
                Ok(Message::RouterSolicitation(RouterSolicitation {
                    options: parse_options(&data[8..])?,
                }))
            }
            ICMPV6_ROUTER_ADVERTISEMENT => {
                if data.len() < 16 {
                    return Err(NdpError::Truncated(data.len()));
                }
                let flags = data[5];
                Ok(Message::RouterAdvertisement(RouterAdvertisement {
                    current_hop_limit: data[4],
                    managed_configuration: flags & RA_FLAG_MANAGED != 0,
                    other_configuration: flags & RA_FLAG_OTHER != 0,
                    mobile_ipv6_home_agent: flags & RA_FLAG_HOME_AGENT != 0,
                    router_selection_preference: Preference::from_bits(flags >> 3),
                    neighbor_discovery_proxy: flags & RA_FLAG_PROXY != 0,
                    router_lifetime: Duration::from_secs(
                        u16::from_be_bytes([data[6], data[7]]) as u64,
                    ),
                    reachable_time: Duration::from_millis(read_u32(&data[8..12]) as u64),
                    retransmit_timer: Duration::from_millis(read_u32(&data[12..16]) as u64),
                    options: parse_options(&data[16..])?,
                }))
            }
            other => Err(NdpError::UnsupportedType(other)),
        }
    }

    /// Serialize to ICMPv6 bytes. The checksum is left zero; the kernel
    /// fills it in for raw ICMPv6 sockets.
    pub fn marshal(&self) -> Result<Vec<u8>, NdpError> {
        let mut buf = Vec::with_capacity(128);

        match self {
            Message::RouterSolicitation(rs) => {
                buf.push(ICMPV6_ROUTER_SOLICITATION);
                buf.push(0); // Code
                buf.extend_from_slice(&[0, 0]); // Checksum
                buf.extend_from_slice(&[0; 4]); // Reserved
                for opt in &rs.options {
                    opt.marshal(&mut buf)?;
                }
            }
            Message::RouterAdvertisement(ra) => {
                let lifetime = ra.router_lifetime.as_secs();
                if lifetime > u16::MAX as u64 {
                    return Err(NdpError::OutOfRange {
                        field: "router lifetime",
                        value: ra.router_lifetime,
                    });
                }

                let mut flags = ra.router_selection_preference.bits() << 3;
                if ra.managed_configuration {
                    flags |= RA_FLAG_MANAGED;
                }
                if ra.other_configuration {
                    flags |= RA_FLAG_OTHER;
                }
                if ra.mobile_ipv6_home_agent {
                    flags |= RA_FLAG_HOME_AGENT;
                }
                if ra.neighbor_discovery_proxy {
                    flags |= RA_FLAG_PROXY;
                }

                buf.push(ICMPV6_ROUTER_ADVERTISEMENT);
                buf.push(0); // Code
                buf.extend_from_slice(&[0, 0]); // Checksum
                buf.push(ra.current_hop_limit);
                buf.push(flags);
                buf.extend_from_slice(&(lifetime as u16).to_be_bytes());
                buf.extend_from_slice(&millis("reachable time", ra.reachable_time)?.to_be_bytes());
                buf.extend_from_slice(
                    &millis("retransmit timer", ra.retransmit_timer)?.to_be_bytes(),
                );
                for opt in &ra.options {
                    opt.marshal(&mut buf)?;
                }
            }
        }

        Ok(buf)
    }
}

impl NdpOption {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<(), NdpError> {
        match self {
            NdpOption::SourceLinkLayerAddress(mac) => marshal_ll_addr(buf, OPT_SOURCE_LL_ADDR, mac),
            NdpOption::TargetLinkLayerAddress(mac) => marshal_ll_addr(buf, OPT_TARGET_LL_ADDR, mac),
            NdpOption::Mtu(mtu) => {
                buf.push(OPT_MTU);
                buf.push(1);
                buf.extend_from_slice(&[0, 0]); // Reserved
                buf.extend_from_slice(&mtu.to_be_bytes());
            }
            NdpOption::PrefixInformation(pi) => {
                if pi.prefix_length > 128 {
                    return Err(NdpError::PrefixLength(pi.prefix_length));
                }
                let mut flags = 0u8;
                if pi.on_link {
                    flags |= PI_FLAG_ON_LINK;
                }
                if pi.autonomous_address_configuration {
                    flags |= PI_FLAG_AUTONOMOUS;
                }

                buf.push(OPT_PREFIX_INFO);
                buf.push(4);
                buf.push(pi.prefix_length);
                buf.push(flags);
                buf.extend_from_slice(&lifetime_secs("valid lifetime", pi.valid_lifetime)?.to_be_bytes());
                buf.extend_from_slice(
                    &lifetime_secs("preferred lifetime", pi.preferred_lifetime)?.to_be_bytes(),
                );
                buf.extend_from_slice(&[0; 4]); // Reserved
                buf.extend_from_slice(&pi.prefix.octets());
            }
            NdpOption::RecursiveDnsServers(rdnss) => {
                if rdnss.servers.is_empty() {
                    return Err(NdpError::NoServers);
                }
                let units = 1 + 2 * rdnss.servers.len();
                if units > u8::MAX as usize {
                    return Err(NdpError::OptionLength {
                        kind: OPT_RDNSS,
                        len: units * 8,
                    });
                }

                buf.push(OPT_RDNSS);
                buf.push(units as u8);
                buf.extend_from_slice(&[0, 0]); // Reserved
                buf.extend_from_slice(&lifetime_secs("RDNSS lifetime", rdnss.lifetime)?.to_be_bytes());
                for s in &rdnss.servers {
                    buf.extend_from_slice(&s.octets());
                }
            }
            NdpOption::DnsSearchList(dnssl) => {
                if dnssl.domain_names.is_empty() {
                    return Err(NdpError::NoDomainNames);
                }

                let mut names = Vec::new();
                for name in &dnssl.domain_names {
                    encode_domain_name(&mut names, name)?;
                }

                // Header (8 bytes) plus names, zero padded to 8 octets.
                let total = (8 + names.len()).div_ceil(8) * 8;
                if total / 8 > u8::MAX as usize {
                    return Err(NdpError::OptionLength {
                        kind: OPT_DNSSL,
                        len: total,
                    });
                }
                names.resize(total - 8, 0);

                buf.push(OPT_DNSSL);
                buf.push((total / 8) as u8);
                buf.extend_from_slice(&[0, 0]); // Reserved
                buf.extend_from_slice(&lifetime_secs("DNSSL lifetime", dnssl.lifetime)?.to_be_bytes());
                buf.extend_from_slice(&names);
            }
            NdpOption::Unknown { kind, data } => {
                if (data.len() + 2) % 8 != 0 || (data.len() + 2) / 8 > u8::MAX as usize {
                    return Err(NdpError::OptionLength {
                        kind: *kind,
                        len: data.len() + 2,
                    });
                }
                buf.push(*kind);
                buf.push(((data.len() + 2) / 8) as u8);
                buf.extend_from_slice(data);
            }
        }
        Ok(())
    }
}

fn marshal_ll_addr(buf: &mut Vec<u8>, kind: u8, mac: &MacAddr) {
    buf.push(kind);
    buf.push(1);
    buf.extend_from_slice(&[mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);
}

fn parse_options(data: &[u8]) -> Result<Vec<NdpOption>, NdpError> {
    let mut options = Vec::new();
    let mut i = 0;

    while i + 2 <= data.len() {
        let kind = data[i];
        let len = data[i + 1] as usize * 8;
        if len == 0 {
            return Err(NdpError::OptionLength { kind, len });
        }
        if i + len > data.len() {
            return Err(NdpError::Truncated(data.len()));
        }

        let body = &data[i + 2..i + len];
        options.push(parse_option(kind, body)?);
        i += len;
    }

    Ok(options)
}

fn parse_option(kind: u8, body: &[u8]) -> Result<NdpOption, NdpError> {
    let bad_len = || NdpError::OptionLength {
        kind,
        len: body.len() + 2,
    };

    let opt = match kind {
        OPT_SOURCE_LL_ADDR | OPT_TARGET_LL_ADDR if body.len() == 6 => {
            let mac = MacAddr(body[0], body[1], body[2], body[3], body[4], body[5]);
            if kind == OPT_SOURCE_LL_ADDR {
                NdpOption::SourceLinkLayerAddress(mac)
            } else {
                NdpOption::TargetLinkLayerAddress(mac)
            }
        }
        OPT_MTU => {
            if body.len() != 6 {
                return Err(bad_len());
            }
            NdpOption::Mtu(read_u32(&body[2..6]))
        }
        OPT_PREFIX_INFO => {
            if body.len() != 30 {
                return Err(bad_len());
            }
            if body[0] > 128 {
                return Err(NdpError::PrefixLength(body[0]));
            }
            let mut prefix = [0u8; 16];
            prefix.copy_from_slice(&body[14..30]);
            NdpOption::PrefixInformation(PrefixInformation {
                prefix_length: body[0],
                on_link: body[1] & PI_FLAG_ON_LINK != 0,
                autonomous_address_configuration: body[1] & PI_FLAG_AUTONOMOUS != 0,
                valid_lifetime: Duration::from_secs(read_u32(&body[2..6]) as u64),
                preferred_lifetime: Duration::from_secs(read_u32(&body[6..10]) as u64),
                prefix: Ipv6Addr::from(prefix),
            })
        }
        OPT_RDNSS => {
            if body.len() < 22 || (body.len() - 6) % 16 != 0 {
                return Err(bad_len());
            }
            let servers = body[6..]
                .chunks_exact(16)
                .map(|c| {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(c);
                    Ipv6Addr::from(octets)
                })
                .collect();
            NdpOption::RecursiveDnsServers(RecursiveDnsServers {
                lifetime: Duration::from_secs(read_u32(&body[2..6]) as u64),
                servers,
            })
        }
        OPT_DNSSL => {
            if body.len() < 14 {
                return Err(bad_len());
            }
            NdpOption::DnsSearchList(DnsSearchList {
                lifetime: Duration::from_secs(read_u32(&body[2..6]) as u64),
                domain_names: decode_domain_names(&body[6..])?,
            })
        }
        _ => NdpOption::Unknown {
            kind,
            data: body.to_vec(),
        },
    };

    Ok(opt)
}

/// Check that `name` can be carried in a DNSSL option.
pub fn validate_domain_name(name: &str) -> Result<(), NdpError> {
    encode_domain_name(&mut Vec::new(), name)
}

fn encode_domain_name(buf: &mut Vec<u8>, name: &str) -> Result<(), NdpError> {
    let invalid = || NdpError::DomainName(name.to_string());

    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() || trimmed.len() > 253 {
        return Err(invalid());
    }

    for label in trimmed.split('.') {
        if label.is_empty() || label.len() > 63 || !label.is_ascii() {
            return Err(invalid());
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    Ok(())
}

fn decode_domain_names(data: &[u8]) -> Result<Vec<String>, NdpError> {
    let mut names = Vec::new();
    let mut labels: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let len = data[i] as usize;
        i += 1;

        if len == 0 {
            if labels.is_empty() {
                // Only padding remains.
                break;
            }
            names.push(labels.join("."));
            labels.clear();
            continue;
        }

        if i + len > data.len() {
            return Err(NdpError::Truncated(data.len()));
        }
        let label = std::str::from_utf8(&data[i..i + len])
            .map_err(|_| NdpError::DomainName(String::from_utf8_lossy(&data[i..i + len]).into()))?;
        labels.push(label);
        i += len;
    }

    if !labels.is_empty() {
        return Err(NdpError::DomainName(labels.join(".")));
    }
    Ok(names)
}

fn lifetime_secs(field: &'static str, d: Duration) -> Result<u32, NdpError> {
    u32::try_from(d.as_secs()).map_err(|_| NdpError::OutOfRange { field, value: d })
}

fn millis(field: &'static str, d: Duration) -> Result<u32, NdpError> {
    u32::try_from(d.as_millis()).map_err(|_| NdpError::OutOfRange { field, value: d })
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
