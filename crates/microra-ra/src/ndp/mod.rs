//! Neighbor Discovery wire format, interfaces and transport.

pub mod conn;
pub mod iface;
pub mod message;

pub use conn::{Conn, ControlMessage, IcmpFilter, RawConn, Received};
pub use iface::Interface;
pub use message::{Message, NdpError, NdpOption, Preference, RouterAdvertisement};
