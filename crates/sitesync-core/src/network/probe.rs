//! Connectivity probing and link quality classification

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::monitor::NetworkMonitor;
use crate::error::{Error, Result};
use crate::models::{ConnectionType, EffectiveType, NetworkStatus};
use crate::task::ScheduledTask;
use crate::util::require_http_url;

const PROBE_TIMEOUT_SECS: u64 = 5;

/// Bucket a link by round-trip time and downlink bandwidth.
///
/// Thresholds follow the Network Information API effective types; the worse of
/// the two measurements wins.
pub fn classify_effective_type(rtt_ms: Option<u32>, downlink_mbps: Option<f64>) -> EffectiveType {
    let by_rtt = rtt_ms.map(|rtt| match rtt {
        2000.. => EffectiveType::Slow2G,
        1400..=1999 => EffectiveType::TwoG,
        270..=1399 => EffectiveType::ThreeG,
        _ => EffectiveType::FourG,
    });
    let by_downlink = downlink_mbps.map(|mbps| {
        if mbps < 0.05 {
            EffectiveType::Slow2G
        } else if mbps < 0.07 {
            EffectiveType::TwoG
        } else if mbps < 0.7 {
            EffectiveType::ThreeG
        } else {
            EffectiveType::FourG
        }
    });

    match (by_rtt, by_downlink) {
        (Some(a), Some(b)) => worst(a, b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => EffectiveType::Unknown,
    }
}

const fn quality_rank(effective: EffectiveType) -> u8 {
    match effective {
        EffectiveType::Slow2G => 0,
        EffectiveType::TwoG => 1,
        EffectiveType::ThreeG => 2,
        EffectiveType::FourG => 3,
        EffectiveType::Unknown => 4,
    }
}

fn worst(a: EffectiveType, b: EffectiveType) -> EffectiveType {
    if quality_rank(a) <= quality_rank(b) {
        a
    } else {
        b
    }
}

/// Source of platform connectivity observations
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> NetworkStatus;
}

/// Probes a health URL and reports the measured round-trip time.
///
/// The link type cannot be observed over HTTP, so it is configured.
pub struct HttpProbe {
    url: String,
    connection_type: ConnectionType,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, connection_type: ConnectionType) -> Result<Self> {
        let url = require_http_url(url, "probe URL")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Network(error.to_string()))?;

        Ok(Self {
            url,
            connection_type,
            client,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> NetworkStatus {
        let started = Instant::now();
        match self.client.head(&self.url).send().await {
            Ok(response) if !response.status().is_server_error() => {
                let rtt_ms = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
                NetworkStatus::online(self.connection_type).with_quality(
                    classify_effective_type(Some(rtt_ms), None),
                    None,
                    Some(rtt_ms),
                )
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), url = %self.url, "Probe got server error");
                NetworkStatus::offline()
            }
            Err(error) => {
                tracing::debug!(%error, url = %self.url, "Probe failed");
                NetworkStatus::offline()
            }
        }
    }
}

/// Poll `probe` every `interval` and feed results to `monitor`.
pub fn spawn_polling<P>(monitor: NetworkMonitor, probe: P, interval: Duration) -> ScheduledTask
where
    P: ConnectivityProbe + 'static,
{
    let probe = std::sync::Arc::new(probe);
    ScheduledTask::every(interval, move || {
        let probe = std::sync::Arc::clone(&probe);
        let monitor = monitor.clone();
        async move {
            let status = probe.probe().await;
            monitor.report(status);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn classifies_by_rtt() {
        assert_eq!(classify_effective_type(Some(2500), None), EffectiveType::Slow2G);
        assert_eq!(classify_effective_type(Some(1500), None), EffectiveType::TwoG);
        assert_eq!(classify_effective_type(Some(300), None), EffectiveType::ThreeG);
        assert_eq!(classify_effective_type(Some(50), None), EffectiveType::FourG);
        assert_eq!(classify_effective_type(None, None), EffectiveType::Unknown);
    }

    #[test]
    fn worst_measurement_wins() {
        assert_eq!(
            classify_effective_type(Some(50), Some(0.03)),
            EffectiveType::Slow2G
        );
        assert_eq!(
            classify_effective_type(Some(500), Some(20.0)),
            EffectiveType::ThreeG
        );
    }

    #[test]
    fn http_probe_requires_scheme() {
        assert!(HttpProbe::new("example.com/health", ConnectionType::Wifi).is_err());
        assert!(HttpProbe::new("https://example.com/health", ConnectionType::Wifi).is_ok());
    }

    struct FlipProbe {
        online: AtomicBool,
    }

    #[async_trait]
    impl ConnectivityProbe for FlipProbe {
        async fn probe(&self) -> NetworkStatus {
            let online = !self.online.fetch_xor(true, Ordering::SeqCst);
            if online {
                NetworkStatus::online(ConnectionType::Cellular)
            } else {
                NetworkStatus::offline()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polling_feeds_monitor() {
        let monitor = NetworkMonitor::new(NetworkStatus::offline());
        let probe = FlipProbe {
            online: AtomicBool::new(false),
        };
        let task = spawn_polling(monitor.clone(), probe, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(monitor.current().is_online);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!monitor.current().is_online);
        task.cancel();
    }
}
