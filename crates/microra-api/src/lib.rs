pub mod rest;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use microra_ra::ndp::RouterAdvertisement;
use microra_ra::system::{Sysctl, SystemState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Debug view of one configured interface.
#[derive(Clone)]
pub struct InterfaceView {
    pub name: String,
    pub advertise: bool,
    last: Option<watch::Receiver<Option<RouterAdvertisement>>>,
}

impl InterfaceView {
    pub fn new(name: &str, advertise: bool) -> Self {
        Self {
            name: name.to_string(),
            advertise,
            last: None,
        }
    }

    /// Follow the advertisements published by an advertiser's observer.
    pub fn with_receiver(mut self, rx: watch::Receiver<Option<RouterAdvertisement>>) -> Self {
        self.last = Some(rx);
        self
    }

    /// The most recently sent advertisement, if any.
    pub fn advertisement(&self) -> Option<RouterAdvertisement> {
        self.last.as_ref().and_then(|rx| rx.borrow().clone())
    }
}

pub struct DebugServer {
    listen_addr: SocketAddr,
    interfaces: Vec<InterfaceView>,
    system: Arc<dyn SystemState>,
    metrics: Option<PrometheusHandle>,
}

#[derive(Clone)]
pub struct AppState {
    pub interfaces: Arc<Vec<InterfaceView>>,
    pub system: Arc<dyn SystemState>,
    /// Set when Prometheus metrics are exported.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State reading host settings from procfs, without metrics.
    pub fn new(interfaces: Vec<InterfaceView>) -> Self {
        Self {
            interfaces: Arc::new(interfaces),
            system: Arc::new(Sysctl::default()),
            metrics: None,
        }
    }

    pub fn with_system(mut self, system: Arc<dyn SystemState>) -> Self {
        self.system = system;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl DebugServer {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            interfaces: Vec::new(),
            system: Arc::new(Sysctl::default()),
            metrics: None,
        }
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceView>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_system(mut self, system: Arc<dyn SystemState>) -> Self {
        self.system = system;
        self
    }

    /// Serve `handle` on `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut state = AppState::new(self.interfaces).with_system(self.system);
        if let Some(handle) = self.metrics {
            state = state.with_metrics(handle);
        }
        let app = app(state);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        info!("debug API listening on {}", self.listen_addr);

        let mut shutdown = shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        Ok(())
    }
}

pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .nest("/api", rest::router())
        .route("/", get(index));
    if state.metrics.is_some() {
        router = router.route("/metrics", get(render_metrics));
    }
    router.with_state(state)
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

async fn index() -> &'static str {
    concat!(
        "microra ",
        env!("CARGO_PKG_VERSION"),
        ": IPv6 router advertisement daemon\n"
    )
}
