use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use ipnet::Ipv6Net;
use microra_ra::ndp::{NdpOption, RouterAdvertisement};
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new().route("/interfaces", get(list_interfaces))
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfacesBody {
    pub interfaces: Vec<InterfaceBody>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceBody {
    pub interface: String,
    pub advertise: bool,
    /// IPv6 forwarding state; only checked for advertising interfaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<bool>,
    /// `None` until the interface has sent an advertisement, and always for
    /// interfaces that do not advertise.
    pub advertisement: Option<AdvertisementBody>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementBody {
    pub current_hop_limit: u8,
    pub managed_configuration: bool,
    pub other_configuration: bool,
    pub mobile_ipv6_home_agent: bool,
    pub router_selection_preference: String,
    pub neighbor_discovery_proxy: bool,
    pub router_lifetime_seconds: u64,
    pub reachable_time_milliseconds: u64,
    pub retransmit_timer_milliseconds: u64,
    pub options: OptionsBody,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsBody {
    pub mtu: u32,
    pub prefixes: Vec<PrefixBody>,
    pub source_link_layer_address: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct PrefixBody {
    /// CIDR notation.
    pub prefix: String,
    pub on_link: bool,
    pub autonomous_address_autoconfiguration: bool,
    pub valid_lifetime_seconds: u64,
    pub preferred_lifetime_seconds: u64,
}

impl AdvertisementBody {
    pub fn from_ra(ra: &RouterAdvertisement) -> Self {
        Self {
            current_hop_limit: ra.current_hop_limit,
            managed_configuration: ra.managed_configuration,
            other_configuration: ra.other_configuration,
            mobile_ipv6_home_agent: ra.mobile_ipv6_home_agent,
            router_selection_preference: ra.router_selection_preference.to_string(),
            neighbor_discovery_proxy: ra.neighbor_discovery_proxy,
            router_lifetime_seconds: ra.router_lifetime.as_secs(),
            reachable_time_milliseconds: ra.reachable_time.as_millis() as u64,
            retransmit_timer_milliseconds: ra.retransmit_timer.as_millis() as u64,
            options: OptionsBody::from_options(&ra.options),
        }
    }
}

impl OptionsBody {
    /// Options without a debug representation are left out.
    fn from_options(opts: &[NdpOption]) -> Self {
        let mut out = Self::default();
        for opt in opts {
            match opt {
                NdpOption::SourceLinkLayerAddress(mac) => {
                    out.source_link_layer_address = mac.to_string();
                }
                NdpOption::Mtu(mtu) => out.mtu = *mtu,
                NdpOption::PrefixInformation(pi) => out.prefixes.push(PrefixBody {
                    prefix: Ipv6Net::new(pi.prefix, pi.prefix_length)
                        .map(|net| net.to_string())
                        .unwrap_or_else(|_| format!("{}/{}", pi.prefix, pi.prefix_length)),
                    on_link: pi.on_link,
                    autonomous_address_autoconfiguration: pi.autonomous_address_configuration,
                    valid_lifetime_seconds: pi.valid_lifetime.as_secs(),
                    preferred_lifetime_seconds: pi.preferred_lifetime.as_secs(),
                }),
                _ => {}
            }
        }
        out
    }
}

async fn list_interfaces(
    State(state): State<AppState>,
) -> Result<Json<InterfacesBody>, (StatusCode, String)> {
    let mut interfaces = Vec::with_capacity(state.interfaces.len());
    for view in state.interfaces.iter() {
        if !view.advertise {
            interfaces.push(InterfaceBody {
                interface: view.name.clone(),
                advertise: false,
                forwarding: None,
                advertisement: None,
            });
            continue;
        }

        let forwarding = state.system.ipv6_forwarding(&view.name).map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to check interface {:?} forwarding: {e}", view.name),
            )
        })?;

        interfaces.push(InterfaceBody {
            interface: view.name.clone(),
            advertise: true,
            forwarding: Some(forwarding),
            advertisement: view.advertisement().map(|ra| AdvertisementBody::from_ra(&ra)),
        });
    }

    Ok(Json(InterfacesBody { interfaces }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app, InterfaceView};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use microra_ra::ndp::message::{MacAddr, PrefixInformation, INFINITY};
    use microra_ra::ndp::Preference;
    use microra_ra::system::SystemState;
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;

    /// Fixed forwarding state, or a permission error when `fail` is set.
    struct FakeSystem {
        forwarding: bool,
        fail: bool,
    }

    impl SystemState for FakeSystem {
        fn ipv6_forwarding(&self, _interface: &str) -> io::Result<bool> {
            if self.fail {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            Ok(self.forwarding)
        }
    }

    async fn request(interfaces: Vec<InterfaceView>, system: FakeSystem) -> (StatusCode, Vec<u8>) {
        let app = app(AppState::new(interfaces).with_system(Arc::new(system)));
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/interfaces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), 1 << 20).await.unwrap();
        (status, body.to_vec())
    }

    async fn fetch(interfaces: Vec<InterfaceView>) -> InterfacesBody {
        let (status, body) = request(
            interfaces,
            FakeSystem {
                forwarding: true,
                fail: false,
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_no_interfaces() {
        assert!(fetch(Vec::new()).await.interfaces.is_empty());
    }

    #[tokio::test]
    async fn test_interfaces() {
        let (tx, rx) = watch::channel(None);
        tx.send_replace(Some(RouterAdvertisement {
            current_hop_limit: 64,
            router_selection_preference: Preference::Medium,
            router_lifetime: Duration::from_secs(30 * 60),
            reachable_time: Duration::from_millis(12345),
            ..Default::default()
        }));

        let body = fetch(vec![
            InterfaceView::new("eth0", true).with_receiver(rx),
            InterfaceView::new("eth1", false),
        ])
        .await;

        let want = InterfacesBody {
            interfaces: vec![
                InterfaceBody {
                    interface: "eth0".into(),
                    advertise: true,
                    forwarding: Some(true),
                    advertisement: Some(AdvertisementBody {
                        current_hop_limit: 64,
                        router_selection_preference: "medium".into(),
                        router_lifetime_seconds: 1800,
                        reachable_time_milliseconds: 12345,
                        ..Default::default()
                    }),
                },
                InterfaceBody {
                    interface: "eth1".into(),
                    advertise: false,
                    forwarding: None,
                    advertisement: None,
                },
            ],
        };
        assert_eq!(body, want);
    }

    #[tokio::test]
    async fn test_advertising_interface_before_first_send() {
        let (_tx, rx) = watch::channel(None);
        let body = fetch(vec![InterfaceView::new("eth0", true).with_receiver(rx)]).await;
        assert!(body.interfaces[0].advertisement.is_none());
    }

    #[tokio::test]
    async fn test_forwarding_check_error() {
        let (status, body) = request(
            vec![
                InterfaceView::new("eth0", true),
                InterfaceView::new("eth1", false),
            ],
            FakeSystem {
                forwarding: true,
                fail: true,
            },
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with(br#"failed to check interface "eth0" forwarding"#));
    }

    #[tokio::test]
    async fn test_forwarding_not_checked_for_passive_interfaces() {
        let (status, _) = request(
            vec![InterfaceView::new("eth1", false)],
            FakeSystem {
                forwarding: false,
                fail: true,
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarding_disabled() {
        let (status, body) = request(
            vec![InterfaceView::new("eth0", true)],
            FakeSystem {
                forwarding: false,
                fail: false,
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: InterfacesBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.interfaces[0].forwarding, Some(false));
    }

    #[test]
    fn test_pack_options() {
        let ra = RouterAdvertisement {
            options: vec![
                NdpOption::Mtu(1500),
                NdpOption::PrefixInformation(PrefixInformation {
                    prefix_length: 64,
                    on_link: true,
                    autonomous_address_configuration: false,
                    valid_lifetime: INFINITY,
                    preferred_lifetime: Duration::from_secs(600),
                    prefix: "2001:db8::".parse().unwrap(),
                }),
                NdpOption::SourceLinkLayerAddress(MacAddr(0x02, 0x00, 0x5e, 0x10, 0x00, 0x01)),
            ],
            ..Default::default()
        };

        let body = AdvertisementBody::from_ra(&ra);
        assert_eq!(body.options.mtu, 1500);
        assert_eq!(body.options.source_link_layer_address, "02:00:5e:10:00:01");
        assert_eq!(
            body.options.prefixes,
            vec![PrefixBody {
                prefix: "2001:db8::/64".into(),
                on_link: true,
                autonomous_address_autoconfiguration: false,
                valid_lifetime_seconds: u32::MAX as u64,
                preferred_lifetime_seconds: 600,
            }]
        );

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["prefixes"][0]["prefix"], "2001:db8::/64");
    }
}
