use crate::builder::{BuildError, Builder};
use crate::ndp::conn::{Conn, IcmpFilter, RawConn, Received};
use crate::ndp::iface::Interface;
use crate::ndp::message::{
    Message, NdpOption, RouterAdvertisement, ALL_NODES, ALL_ROUTERS, ICMPV6_ROUTER_SOLICITATION,
};
use crate::plugin::Plugin;
use crate::retry::{ReceiveError, RetryPolicy};
use metrics::counter;
use microra_core::config::InterfaceConfig;
use microra_core::context::Context;
use std::io;
use std::net::Ipv6Addr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AdvertiserError {
    #[error("failed to look up interface {interface:?}: {source}")]
    Lookup {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create NDP listener: {0}")]
    Dial(#[source] io::Error),

    #[error("failed to apply ICMPv6 filter: {0}")]
    Filter(#[source] io::Error),

    #[error("failed to join IPv6 link-local all routers multicast group: {0}")]
    JoinGroup(#[source] io::Error),

    #[error(transparent)]
    Prepare(#[from] BuildError),
}

#[derive(Error, Debug)]
pub enum AdvertiseError {
    #[error("failed to build NDP router advertisement: {0}")]
    Build(#[source] BuildError),

    #[error("failed to send NDP router advertisement: {0}")]
    Send(#[source] io::Error),
}

impl AdvertiseError {
    /// Short label for the errors counter.
    pub fn kind(&self) -> &'static str {
        match self {
            AdvertiseError::Build(_) => "build",
            AdvertiseError::Send(_) => "send",
        }
    }
}

/// Sends periodic router advertisements on one interface.
pub struct Advertiser<C = RawConn> {
    conn: C,
    ifi: Interface,
    ip: Ipv6Addr,
    cfg: InterfaceConfig,
    builder: Builder,
    interval: Duration,
    retry: RetryPolicy,
    observer: Option<watch::Sender<Option<RouterAdvertisement>>>,
}

impl Advertiser<RawConn> {
    /// Resolve the configured interface, open a raw ICMPv6 socket that only
    /// accepts router solicitations and join ff02::2.
    pub fn new(cfg: InterfaceConfig) -> Result<Self, AdvertiserError> {
        let ifi = Interface::by_name(&cfg.name).map_err(|source| AdvertiserError::Lookup {
            interface: cfg.name.clone(),
            source,
        })?;

        let (conn, ip) = RawConn::dial(&ifi).map_err(AdvertiserError::Dial)?;

        let mut filter = IcmpFilter::block_all();
        filter.accept(ICMPV6_ROUTER_SOLICITATION);
        conn.set_icmp_filter(&filter).map_err(AdvertiserError::Filter)?;

        conn.join_group(ALL_ROUTERS)
            .map_err(AdvertiserError::JoinGroup)?;

        Self::with_conn(cfg, ifi, conn, ip)
    }
}

impl<C: Conn> Advertiser<C> {
    /// Advertiser over an already open connection whose source address is
    /// `ip`.
    pub fn with_conn(
        cfg: InterfaceConfig,
        ifi: Interface,
        conn: C,
        ip: Ipv6Addr,
    ) -> Result<Self, AdvertiserError> {
        let mut builder = Builder::from_config(&cfg);
        builder.prepare(&ifi)?;

        Ok(Self {
            conn,
            ifi,
            ip,
            interval: cfg.interval(),
            cfg,
            builder,
            retry: RetryPolicy::default(),
            observer: None,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish every sent advertisement on `tx`.
    pub fn with_observer(mut self, tx: watch::Sender<Option<RouterAdvertisement>>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn interface(&self) -> &Interface {
        &self.ifi
    }

    pub fn plugins(&self) -> &[Box<dyn Plugin>] {
        self.builder.plugins()
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.cfg
    }

    pub fn source_addr(&self) -> Ipv6Addr {
        self.ip
    }

    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Read the next NDP message, bounded by the context's deadline.
    pub async fn receive(&mut self, ctx: &Context) -> Result<Received, ReceiveError> {
        self.conn
            .set_read_deadline(ctx.deadline())
            .map_err(ReceiveError::Read)?;
        self.retry.receive(ctx, &mut self.conn).await
    }

    /// Send router advertisements to ff02::1 every interval until `ctx` is
    /// done. Cancellation is a clean return.
    pub async fn advertise(&mut self, ctx: &Context) -> Result<(), AdvertiseError> {
        info!(
            interface = %self.ifi.name,
            source = %self.ip,
            interval = ?self.interval,
            "initialized, sending router advertisements"
        );

        loop {
            if ctx.err().is_some() {
                return Ok(());
            }

            let result = match self.builder.build(&self.cfg) {
                Ok(Some(ra)) => self.send(ra).await,
                Ok(None) => {
                    debug!(interface = %self.ifi.name, "router advertisement skipped by plugin");
                    Ok(())
                }
                Err(e) => Err(AdvertiseError::Build(e)),
            };
            if let Err(e) = result {
                counter!(
                    "microra_advertiser_errors_total",
                    "interface" => self.ifi.name.clone(),
                    "error" => e.kind()
                )
                .increment(1);
                return Err(e);
            }

            if ctx.sleep(self.interval).await.is_err() {
                return Ok(());
            }
        }
    }

    async fn send(&mut self, mut ra: RouterAdvertisement) -> Result<(), AdvertiseError> {
        if let Some(mac) = self.ifi.hardware_addr {
            ra.options.push(NdpOption::SourceLinkLayerAddress(mac));
        }

        let msg = Message::RouterAdvertisement(ra.clone());
        self.conn
            .write_to(&msg, None, ALL_NODES)
            .await
            .map_err(AdvertiseError::Send)?;

        debug!(
            interface = %self.ifi.name,
            hop_limit = ra.current_hop_limit,
            router_lifetime = ?ra.router_lifetime,
            options = ra.options.len(),
            "sent router advertisement"
        );
        counter!(
            "microra_advertiser_router_advertisements_total",
            "interface" => self.ifi.name.clone()
        )
        .increment(1);

        if let Some(tx) = &self.observer {
            tx.send_replace(Some(ra));
        }

        Ok(())
    }

    /// Release the transport.
    pub fn close(self) {
        info!(interface = %self.ifi.name, "advertiser closed");
    }
}
