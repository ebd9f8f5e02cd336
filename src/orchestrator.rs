use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::cancel::CancelScopes;
use crate::directory::EndpointDirectory;
use crate::error::MeasureError;
use crate::measure::MeasurementProvider;
use crate::models::{CandidateEndpoint, Location, LocationResult, ProviderMeasurement};
use crate::sampler;

const CANCELLED: &str = "cancelled";
const LOCATION_TIMEOUT: &str = "location timeout exceeded";

#[derive(Debug, Clone)]
pub(crate) struct OrchestratorSettings {
    pub(crate) max_providers: usize,
    pub(crate) threads: usize,
    pub(crate) endpoint_timeout: Duration,
    pub(crate) location_timeout: Duration,
    pub(crate) provider_pause: Duration,
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

impl Interrupt {
    fn reason(&self) -> &'static str {
        match self {
            Interrupt::Cancelled => CANCELLED,
            Interrupt::TimedOut => LOCATION_TIMEOUT,
        }
    }
}

/// Runs the full test for one location: discovery, sampling, one measurement per
/// selected provider (never two at once) and aggregation.
pub(crate) struct LocationTester<'a> {
    directory: &'a dyn EndpointDirectory,
    measurer: &'a dyn MeasurementProvider,
    settings: &'a OrchestratorSettings,
}

impl<'a> LocationTester<'a> {
    pub(crate) fn new(
        directory: &'a dyn EndpointDirectory,
        measurer: &'a dyn MeasurementProvider,
        settings: &'a OrchestratorSettings,
    ) -> Self {
        Self {
            directory,
            measurer,
            settings,
        }
    }

    pub(crate) async fn run_location<R: Rng + Send + ?Sized>(
        &self,
        location: &Location,
        scopes: &CancelScopes,
        rng: &mut R,
    ) -> LocationResult {
        let started = Instant::now();
        let timestamp = Utc::now();
        let deadline = started + self.settings.location_timeout;
        let cancel = scopes.enter_location();

        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = time::timeout_at(deadline, self.directory.lookup(&location.name)) => Some(r),
        };

        let candidates = match lookup {
            None => return self.early_failure(location, CANCELLED, started),
            Some(Err(_)) => {
                return self.early_failure(location, "directory error: lookup timed out", started);
            }
            Some(Ok(Err(e))) => {
                warn!(location = %location.name, error = %e, "endpoint lookup failed");
                return self.early_failure(location, format!("directory error: {}", e), started);
            }
            Some(Ok(Ok(candidates))) => candidates,
        };

        if candidates.is_empty() {
            let error = format!("no endpoints found for {}", location.name);
            return self.early_failure(location, error, started);
        }

        let selected = sampler::select(&candidates, self.settings.max_providers, rng);
        info!(
            location = %location.name,
            found = candidates.len(),
            testing = selected.len(),
            "selected providers"
        );
        for (i, endpoint) in selected.iter().enumerate() {
            debug!(
                "  {}. {} - {} ({:.0}km)",
                i + 1,
                endpoint.sponsor,
                endpoint.name,
                endpoint.distance_km
            );
        }

        let (isp_results, interrupt) = self
            .measure_all(&selected, scopes, &cancel, deadline)
            .await;

        let (aggregated_stats, best_isp) = aggregate(&isp_results);
        let success = aggregated_stats.successful_isps > 0;
        let error = if success {
            None
        } else {
            Some(
                interrupt
                    .map(|i| i.reason().to_string())
                    .unwrap_or_else(|| "all providers failed".to_string()),
            )
        };

        LocationResult {
            location: location.clone(),
            isp_results,
            best_isp,
            aggregated_stats,
            timestamp,
            success,
            error,
            servers_attempted: selected.len(),
            test_duration_seconds: started.elapsed().as_secs_f64(),
        }
    }

    /// Measures providers in order. Stops early only when the location itself is
    /// cancelled or out of time; the measurements gathered so far are kept.
    async fn measure_all(
        &self,
        selected: &[CandidateEndpoint],
        scopes: &CancelScopes,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> (Vec<ProviderMeasurement>, Option<Interrupt>) {
        let mut results = Vec::with_capacity(selected.len());

        for (i, endpoint) in selected.iter().enumerate() {
            if cancel.is_cancelled() {
                return (results, Some(Interrupt::Cancelled));
            }
            if Instant::now() >= deadline {
                return (results, Some(Interrupt::TimedOut));
            }

            debug!(
                "[{}/{}] testing {} - {}",
                i + 1,
                selected.len(),
                endpoint.sponsor,
                endpoint.name
            );

            let measurement = {
                let provider = scopes.enter_provider(cancel);
                self.measure_one(endpoint, &provider, deadline).await
            };

            match &measurement.error {
                None => info!(
                    isp = %measurement.isp,
                    latency_ms = format_args!("{:.1}", measurement.latency_ms),
                    download_mbps = format_args!("{:.1}", measurement.download_mbps),
                    upload_mbps = format_args!("{:.1}", measurement.upload_mbps),
                    "provider measured"
                ),
                Some(error) => warn!(isp = %measurement.isp, %error, "provider failed"),
            }
            results.push(measurement);

            if cancel.is_cancelled() {
                return (results, Some(Interrupt::Cancelled));
            }
            if Instant::now() >= deadline {
                return (results, Some(Interrupt::TimedOut));
            }

            if i + 1 < selected.len() && !self.settings.provider_pause.is_zero() {
                let resume = (Instant::now() + self.settings.provider_pause).min(deadline);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = time::sleep_until(resume) => {}
                }
            }
        }

        (results, None)
    }

    async fn measure_one(
        &self,
        endpoint: &CandidateEndpoint,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> ProviderMeasurement {
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .min(self.settings.endpoint_timeout);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ProviderMeasurement::failed(endpoint, CANCELLED),
            r = time::timeout(
                budget,
                self.measurer.measure(endpoint, self.settings.threads, budget),
            ) => r,
        };

        match outcome {
            Ok(Ok(raw)) => ProviderMeasurement::from_raw(endpoint, raw),
            Ok(Err(e)) => ProviderMeasurement::failed(endpoint, e.to_string()),
            Err(_) if Instant::now() >= deadline => {
                ProviderMeasurement::failed(endpoint, LOCATION_TIMEOUT)
            }
            Err(_) => ProviderMeasurement::failed(endpoint, MeasureError::TimedOut.to_string()),
        }
    }

    fn early_failure(
        &self,
        location: &Location,
        error: impl Into<String>,
        started: Instant,
    ) -> LocationResult {
        let mut result = LocationResult::failed(location.clone(), error);
        result.test_duration_seconds = started.elapsed().as_secs_f64();
        result
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::DirectoryError;
    use crate::models::RawMeasurement;

    /// Directory answering from a fixed table; unknown names fail with 503.
    #[derive(Default)]
    pub(crate) struct FakeDirectory {
        pub(crate) entries: HashMap<String, Vec<CandidateEndpoint>>,
        pub(crate) lookups: Mutex<Vec<String>>,
    }

    impl FakeDirectory {
        pub(crate) fn with(mut self, location: &str, endpoints: Vec<CandidateEndpoint>) -> Self {
            self.entries.insert(location.to_string(), endpoints);
            self
        }
    }

    #[async_trait]
    impl EndpointDirectory for FakeDirectory {
        async fn lookup(
            &self,
            location_name: &str,
        ) -> Result<Vec<CandidateEndpoint>, DirectoryError> {
            self.lookups.lock().push(location_name.to_string());
            self.entries
                .get(location_name)
                .cloned()
                .ok_or(DirectoryError::Status(503))
        }
    }

    pub(crate) enum Behavior {
        Ok(RawMeasurement),
        Fail(fn() -> MeasureError),
        Hang,
    }

    /// Measurer keyed by endpoint id. Tracks how many measurements overlap.
    #[derive(Default)]
    pub(crate) struct FakeMeasurer {
        pub(crate) behaviors: HashMap<String, Behavior>,
        pub(crate) order: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        pub(crate) max_in_flight: AtomicUsize,
    }

    impl FakeMeasurer {
        pub(crate) fn ok(mut self, id: &str, latency: f64, down: f64, up: f64) -> Self {
            self.behaviors.insert(
                id.to_string(),
                Behavior::Ok(RawMeasurement {
                    latency_ms: latency,
                    jitter_ms: 1.0,
                    download_mbps: down,
                    upload_mbps: up,
                    packet_loss_pct: 0.0,
                }),
            );
            self
        }

        pub(crate) fn fail(mut self, id: &str, err: fn() -> MeasureError) -> Self {
            self.behaviors.insert(id.to_string(), Behavior::Fail(err));
            self
        }

        pub(crate) fn hang(mut self, id: &str) -> Self {
            self.behaviors.insert(id.to_string(), Behavior::Hang);
            self
        }
    }

    #[async_trait]
    impl MeasurementProvider for FakeMeasurer {
        async fn measure(
            &self,
            endpoint: &CandidateEndpoint,
            _threads: usize,
            _timeout: Duration,
        ) -> Result<RawMeasurement, MeasureError> {
            self.order.lock().push(endpoint.id.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(2)).await;

            let outcome = match self.behaviors.get(&endpoint.id) {
                Some(Behavior::Ok(raw)) => Ok(*raw),
                Some(Behavior::Fail(err)) => Err(err()),
                Some(Behavior::Hang) => {
                    time::sleep(Duration::from_secs(3600)).await;
                    Err(MeasureError::TimedOut)
                }
                None => Err(MeasureError::Ping("unknown endpoint".to_string())),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }
}
