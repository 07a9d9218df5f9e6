//! NDP transport.
//!
//! [`Conn`] is the capability the advertise and receive paths depend on;
//! [`RawConn`] implements it on a raw ICMPv6 socket bound to one interface.

use crate::ndp::iface::Interface;
use crate::ndp::message::Message;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::AsRawFd;
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tracing::trace;

/// Ancillary data received alongside an NDP message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlMessage {
    pub hop_limit: Option<u8>,
    pub destination: Option<Ipv6Addr>,
    pub interface_index: Option<u32>,
}

/// One message read from a [`Conn`]: the message, its control data and the
/// sender's address.
pub type Received = (Message, ControlMessage, Ipv6Addr);

#[async_trait]
pub trait Conn: Send {
    /// Read the next NDP message. Fails with [`io::ErrorKind::TimedOut`]
    /// once the read deadline passes.
    async fn read_from(&mut self) -> io::Result<Received>;

    /// Set or clear the deadline for future reads.
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    async fn write_to(
        &mut self,
        msg: &Message,
        cm: Option<&ControlMessage>,
        dst: Ipv6Addr,
    ) -> io::Result<()>;
}

// linux/icmpv6.h
const ICMP6_FILTER: libc::c_int = 1;

/// Kernel-side ICMPv6 type filter (RFC 3542 section 3.2). A set bit blocks
/// the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpFilter {
    data: [u32; 8],
}

impl IcmpFilter {
    pub fn block_all() -> Self {
        Self { data: [u32::MAX; 8] }
    }

    pub fn accept(&mut self, kind: u8) {
        self.data[(kind >> 5) as usize] &= !(1u32 << (kind & 31));
    }

    pub fn will_pass(&self, kind: u8) -> bool {
        self.data[(kind >> 5) as usize] & (1u32 << (kind & 31)) == 0
    }
}

/// Raw ICMPv6 socket scoped to one interface's link-local address.
pub struct RawConn {
    socket: AsyncFd<Socket>,
    index: u32,
    read_deadline: Option<Instant>,
}

impl RawConn {
    /// Open a raw ICMPv6 socket on `ifi`, bound to its link-local address.
    /// Returns the connection and the bound source address.
    pub fn dial(ifi: &Interface) -> io::Result<(Self, Ipv6Addr)> {
        let ip = ifi.link_local()?;

        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))?;
        socket.bind(&SocketAddrV6::new(ip, 0, 0, ifi.index).into())?;
        // RFC 4861 requires hop limit 255 on all NDP traffic.
        socket.set_multicast_hops_v6(255)?;
        socket.set_unicast_hops_v6(255)?;
        socket.set_multicast_if_v6(ifi.index)?;
        socket.set_multicast_loop_v6(false)?;
        set_int_opt(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT, 1)?;
        set_int_opt(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)?;
        socket.set_nonblocking(true)?;

        Ok((
            Self {
                socket: AsyncFd::new(socket)?,
                index: ifi.index,
                read_deadline: None,
            },
            ip,
        ))
    }

    pub fn set_icmp_filter(&self, filter: &IcmpFilter) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.socket.get_ref().as_raw_fd(),
                libc::IPPROTO_ICMPV6,
                ICMP6_FILTER,
                filter.data.as_ptr() as *const libc::c_void,
                std::mem::size_of_val(&filter.data) as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn join_group(&self, group: Ipv6Addr) -> io::Result<()> {
        self.socket.get_ref().join_multicast_v6(&group, self.index)
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv6Addr, ControlMessage)> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|s| recv_msg(s.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl Conn for RawConn {
    async fn read_from(&mut self) -> io::Result<Received> {
        let mut buf = vec![0u8; 1500];
        let deadline = self.read_deadline;

        loop {
            let (len, src, cm) = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.recv(&mut buf))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "i/o timeout"))??,
                None => self.recv(&mut buf).await?,
            };

            match Message::parse(&buf[..len]) {
                Ok(msg) => return Ok((msg, cm, src)),
                Err(e) => {
                    trace!(%src, error = %e, "ignoring malformed NDP message");
                    continue;
                }
            }
        }
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.read_deadline = deadline;
        Ok(())
    }

    async fn write_to(
        &mut self,
        msg: &Message,
        cm: Option<&ControlMessage>,
        dst: Ipv6Addr,
    ) -> io::Result<()> {
        let bytes = msg
            .marshal()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let scope = cm.and_then(|cm| cm.interface_index).unwrap_or(self.index);
        let addr: SockAddr = SocketAddrV6::new(dst, 0, 0, scope).into();

        loop {
            let mut guard = self.socket.writable().await?;
            match guard.try_io(|s| s.get_ref().send_to(&bytes, &addr)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }
}

fn set_int_opt(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// recvmsg(2) with IPV6_HOPLIMIT and IPV6_PKTINFO control messages.
fn recv_msg(socket: &Socket, buf: &mut [u8]) -> io::Result<(usize, Ipv6Addr, ControlMessage)> {
    let mut addr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    // u64 elements keep the control buffer aligned for cmsghdr.
    let mut control = [0u64; 16];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut addr as *mut libc::sockaddr_in6 as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = std::mem::size_of_val(&control) as _;

    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut cm = ControlMessage::default();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::IPPROTO_IPV6 {
                let data = libc::CMSG_DATA(cmsg);
                match hdr.cmsg_type {
                    libc::IPV6_HOPLIMIT => {
                        let hops = std::ptr::read_unaligned(data as *const libc::c_int);
                        cm.hop_limit = u8::try_from(hops).ok();
                    }
                    libc::IPV6_PKTINFO => {
                        let info = std::ptr::read_unaligned(data as *const libc::in6_pktinfo);
                        cm.destination = Some(Ipv6Addr::from(info.ipi6_addr.s6_addr));
                        cm.interface_index = Some(info.ipi6_ifindex as u32);
                    }
                    _ => {}
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((n as usize, Ipv6Addr::from(addr.sin6_addr.s6_addr), cm))
}
