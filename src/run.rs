use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use statistical::mean;
use tokio::time;
use tracing::{info, warn};

use crate::broadcast::{Progress, StreamBroadcaster, StreamEvent};
use crate::cancel::CancelScopes;
use crate::locations::LocationCatalog;
use crate::models::{CallerInfo, LocationResult, RunRecord, RunSummary};
use crate::orchestrator::LocationTester;

const RUN_CANCELLED: &str = "run cancelled";

/// Drives one pass over the whole catalog, a location at a time.
pub(crate) struct RunController<'a> {
    tester: LocationTester<'a>,
    broadcaster: Option<&'a StreamBroadcaster>,
    inter_location_delay: Duration,
    rng: StdRng,
}

impl<'a> RunController<'a> {
    pub(crate) fn new(tester: LocationTester<'a>, inter_location_delay: Duration) -> Self {
        Self {
            tester,
            broadcaster: None,
            inter_location_delay,
            rng: StdRng::from_os_rng(),
        }
    }

    pub(crate) fn with_broadcaster(mut self, broadcaster: &'a StreamBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn publish(&self, event: StreamEvent) {
        if let Some(broadcaster) = self.broadcaster {
            broadcaster.publish(&event);
        }
    }

    /// Tests every location in catalog order and returns the sorted record.
    ///
    /// Every catalog entry yields exactly one result; once the run is cancelled the
    /// locations not yet started are recorded as failures without being contacted.
    pub(crate) async fn run_all(
        &mut self,
        catalog: &LocationCatalog,
        user_info: Option<CallerInfo>,
        scopes: &CancelScopes,
    ) -> RunRecord {
        let total = catalog.len();
        let mut tests = Vec::with_capacity(total);

        self.publish(StreamEvent::RunStarted);

        for (i, location) in catalog.locations().iter().enumerate() {
            self.publish(StreamEvent::Progress(Progress {
                current: i + 1,
                total,
                location: location.name.clone(),
            }));
            let result = if scopes.is_run_cancelled() {
                LocationResult::failed(location.clone(), RUN_CANCELLED)
            } else {
                info!("[{}/{}] testing {}", i + 1, total, location.name);
                self.tester
                    .run_location(location, scopes, &mut self.rng)
                    .await
            };

            if result.success {
                info!(
                    location = %location.name,
                    providers = format_args!(
                        "{}/{}",
                        result.aggregated_stats.successful_isps,
                        result.aggregated_stats.total_isps
                    ),
                    latency_ms = format_args!("{:.1}", result.latency_ms()),
                    "location finished"
                );
            } else {
                warn!(
                    location = %location.name,
                    error = result.error.as_deref().unwrap_or_default(),
                    attempted = result.servers_attempted,
                    "location failed"
                );
            }

            self.publish(StreamEvent::LocationResult(Box::new(result.clone())));
            tests.push(result);

            if i + 1 < total && !scopes.is_run_cancelled() && !self.inter_location_delay.is_zero() {
                tokio::select! {
                    _ = scopes.run_token().cancelled() => {}
                    _ = time::sleep(self.inter_location_delay) => {}
                }
            }
        }

        self.publish(StreamEvent::RunCompleted);

        let mut record = RunRecord {
            user_info,
            tests,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        record.sort_by_latency();
        record
    }
}

impl RunRecord {
    /// Successful locations first, fastest best provider first; failures keep
    /// their relative order at the end.
    pub(crate) fn sort_by_latency(&mut self) {
        self.tests.sort_by(|a, b| match (a.success, b.success) {
            (true, true) => a.latency_ms().total_cmp(&b.latency_ms()),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => std::cmp::Ordering::Equal,
        });
    }

    pub(crate) fn summary(&self) -> RunSummary {
        let successes: Vec<&LocationResult> = self.tests.iter().filter(|t| t.success).collect();
        let mut summary = RunSummary {
            total: self.tests.len(),
            successful: successes.len(),
            success_rate: 0.0,
            avg_latency: 0.0,
            avg_download: 0.0,
            avg_upload: 0.0,
            best_latency: None,
            best_download: None,
        };
        if successes.is_empty() {
            return summary;
        }

        let latencies: Vec<f64> = successes.iter().map(|t| t.latency_ms()).collect();
        let downloads: Vec<f64> = successes.iter().map(|t| t.download_mbps()).collect();
        let uploads: Vec<f64> = successes.iter().map(|t| t.upload_mbps()).collect();
        summary.success_rate = successes.len() as f64 / self.tests.len() as f64 * 100.0;
        summary.avg_latency = mean(&latencies);
        summary.avg_download = mean(&downloads);
        summary.avg_upload = mean(&uploads);

        let mut best_latency = successes[0];
        let mut best_download = successes[0];
        for t in &successes[1..] {
            if t.latency_ms() < best_latency.latency_ms() {
                best_latency = t;
            }
            if t.download_mbps() > best_download.download_mbps() {
                best_download = t;
            }
        }
        summary.best_latency = Some(best_latency.clone());
        summary.best_download = Some(best_download.clone());
        summary
    }
}
