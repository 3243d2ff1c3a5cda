//! Client IP geolocation
//!
//! One lookup per session against an ipwho.is-compatible endpoint
//! (`GET {endpoint}/{ip}` → `{success, latitude, longitude}`). Any failure
//! means no geolocation; the session never waits on it beyond the timeout.

use lvs_common::config::GeolocationConfig;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    success: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GeoLocator {
    client: Option<reqwest::Client>,
    endpoint: String,
}

impl GeoLocator {
    pub fn new(config: &GeolocationConfig) -> Self {
        let client = if config.enabled {
            match reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
            {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("Geolocation disabled, client build failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Locator that never looks anything up
    pub fn disabled() -> Self {
        Self {
            client: None,
            endpoint: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub async fn locate(&self, ip: IpAddr) -> Option<GeoPoint> {
        let client = self.client.as_ref()?;
        if !is_routable(ip) {
            debug!("Skipping geolocation for local address {}", ip);
            return None;
        }

        let url = format!("{}/{}", self.endpoint, ip);
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Geolocation lookup for {} failed: {}", ip, e);
                return None;
            }
        };
        let body: LookupResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Geolocation response for {} unreadable: {}", ip, e);
                return None;
            }
        };

        match (body.success, body.latitude, body.longitude) {
            (true, Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => {
                debug!("No geolocation for {}", ip);
                None
            }
        }
    }
}

/// Addresses a public lookup service can say anything about
fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()),
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}
