//! Network and service reachability probes
//!
//! ## Responsibilities
//!
//! - Decide whether uploads should run at all this cycle
//! - Distinguish "no network" from "network up, service down"
//!
//! General connectivity is probed by DNS, plain HTTP and a raw TCP
//! connect, in that order; any success is enough. When the general probe
//! fails the service probe is skipped, since it cannot say anything
//! useful without a network.

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

const DNS_PROBE_HOST: &str = "www.google.com:443";
const TCP_PROBE_ADDR: &str = "8.8.8.8:53";

/// Outcome of one connectivity check cycle
#[derive(Debug, Clone, Copy)]
pub struct ConnectivityState {
    pub network_reachable: bool,
    pub service_reachable: bool,
    pub checked_at: DateTime<Utc>,
}

impl ConnectivityState {
    /// Uploads run only with both the network and the service up
    pub fn upload_enabled(&self) -> bool {
        self.network_reachable && self.service_reachable
    }

    pub fn offline() -> Self {
        Self {
            network_reachable: false,
            service_reachable: false,
            checked_at: Utc::now(),
        }
    }
}

/// A service endpoint that answers at all is reachable; auth rejections
/// still prove the service is up.
fn service_status_reachable(status: reqwest::StatusCode) -> bool {
    status.is_success()
        || status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
}

pub struct ConnectivityMonitor {
    client: reqwest::Client,
    service_url: String,
    probe_urls: Vec<String>,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl ConnectivityMonitor {
    pub fn new(
        service_url: String,
        timeout: Duration,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            service_url,
            probe_urls: vec![
                "http://www.google.com".to_string(),
                "http://www.cloudflare.com".to_string(),
            ],
            timeout,
            retries,
            retry_delay,
        })
    }

    /// Run one full check cycle with retries and a fixed delay between
    /// attempts. Never fails; an error anywhere reads as unreachable.
    pub async fn check(&self) -> ConnectivityState {
        let network_reachable = self.retrying(|| self.network_probe()).await;
        let service_reachable = if network_reachable {
            self.retrying(|| self.service_probe()).await
        } else {
            tracing::debug!("Network down, skipping service probe");
            false
        };

        let state = ConnectivityState {
            network_reachable,
            service_reachable,
            checked_at: Utc::now(),
        };
        tracing::debug!(
            network = state.network_reachable,
            service = state.service_reachable,
            "Connectivity checked"
        );
        state
    }

    async fn retrying<F, Fut>(&self, probe: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for attempt in 1..=self.retries.max(1) {
            if probe().await {
                return true;
            }
            if attempt < self.retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }

    async fn network_probe(&self) -> bool {
        if self.dns_probe().await {
            return true;
        }
        for url in &self.probe_urls {
            if self.client.get(url).send().await.is_ok() {
                return true;
            }
        }
        self.tcp_probe().await
    }

    async fn dns_probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::lookup_host(DNS_PROBE_HOST)).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            _ => false,
        }
    }

    async fn tcp_probe(&self) -> bool {
        tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(TCP_PROBE_ADDR))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn service_probe(&self) -> bool {
        let url = format!("{}/rest/v1/", self.service_url);
        match self.client.get(&url).send().await {
            Ok(resp) => service_status_reachable(resp.status()),
            Err(e) => {
                tracing::debug!(error = %e, "Service probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_requires_both_network_and_service() {
        let mut state = ConnectivityState::offline();
        assert!(!state.upload_enabled());

        state.network_reachable = true;
        assert!(!state.upload_enabled());

        state.service_reachable = true;
        assert!(state.upload_enabled());
    }

    #[test]
    fn test_auth_rejections_count_as_reachable() {
        assert!(service_status_reachable(reqwest::StatusCode::OK));
        assert!(service_status_reachable(reqwest::StatusCode::UNAUTHORIZED));
        assert!(service_status_reachable(reqwest::StatusCode::FORBIDDEN));
        assert!(!service_status_reachable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!service_status_reachable(
            reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_retry_stops_on_first_success() {
        let monitor = ConnectivityMonitor::new(
            "http://localhost:9".to_string(),
            Duration::from_millis(50),
            3,
            Duration::from_millis(1),
        )
        .unwrap();

        let calls = std::sync::atomic::AtomicU32::new(0);
        let ok = monitor
            .retrying(|| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { true }
            })
            .await;
        assert!(ok);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let monitor = ConnectivityMonitor::new(
            "http://localhost:9".to_string(),
            Duration::from_millis(50),
            3,
            Duration::from_millis(1),
        )
        .unwrap();

        let calls = std::sync::atomic::AtomicU32::new(0);
        let ok = monitor
            .retrying(|| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { false }
            })
            .await;
        assert!(!ok);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
