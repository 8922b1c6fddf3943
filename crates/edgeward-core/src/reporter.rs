// ── Metrics reporter ──
//
// Periodically snapshots interface state and device counters through the
// provider and forwards them as `METRICS_REPORT`. Sampling is skipped while
// the channel is down; a failed sample is logged and the cycle dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edgeward_api::{ChannelHandle, MetricsReport, Outbound};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::convert;
use crate::provider::{self, Provider, ProviderError};

pub struct Reporter {
    provider: Arc<dyn Provider>,
    device_id: String,
    interval: Duration,
    timeout: Duration,
}

impl Reporter {
    pub fn new(
        provider: Arc<dyn Provider>,
        device_id: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            device_id: device_id.into(),
            interval,
            timeout,
        }
    }

    /// Take one sample.
    pub async fn collect(&self) -> Result<MetricsReport, ProviderError> {
        let interfaces =
            provider::bounded(self.timeout, "get_interfaces", self.provider.get_interfaces())
                .await?;
        let metrics =
            provider::bounded(self.timeout, "get_metrics", self.provider.get_metrics()).await?;
        Ok(convert::metrics_report(
            &self.device_id,
            Utc::now(),
            &interfaces,
            metrics,
        ))
    }

    /// Sample every `interval` until cancelled.
    pub fn spawn(self, channel: ChannelHandle, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !channel.state().is_connected() {
                    debug!("control channel down, skipping metrics sample");
                    continue;
                }

                match self.collect().await {
                    Ok(report) => {
                        if let Err(e) = channel.try_send(Outbound::MetricsReport(report)) {
                            warn!(error = %e, "metrics report not queued");
                        }
                    }
                    Err(e) => warn!(error = %e, "metrics collection failed, skipping cycle"),
                }
            }
            debug!("metrics reporter exiting");
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::provider::memory::MemoryProvider;

    #[tokio::test]
    async fn collect_includes_interfaces_and_counters() {
        let provider = Arc::new(MemoryProvider::new());
        let reporter = Reporter::new(
            provider,
            "edge-01",
            Duration::from_secs(30),
            Duration::from_secs(1),
        );

        let report = reporter.collect().await.unwrap();
        assert_eq!(report.device_id, "edge-01");
        let names: Vec<_> = report.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["lo", "eth0"]);
    }
}
