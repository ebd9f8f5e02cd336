use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct Location {
    pub(crate) name: String,
    pub(crate) country_code: String,
    pub(crate) lat: f64,
    pub(crate) lon: f64,
    pub(crate) description: String,
    pub(crate) region: String,
}

/// A provider-operated server returned by the endpoint directory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct CandidateEndpoint {
    pub(crate) id: String,
    pub(crate) name: String,
    /// Provider identity; several endpoints may share one sponsor.
    pub(crate) sponsor: String,
    pub(crate) host: String,
    #[serde(default)]
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) country: String,
    #[serde(rename = "distance", default)]
    pub(crate) distance_km: f64,
}

/// Unvalidated numbers reported by a measurement provider.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct RawMeasurement {
    pub(crate) latency_ms: f64,
    pub(crate) jitter_ms: f64,
    pub(crate) download_mbps: f64,
    pub(crate) upload_mbps: f64,
    pub(crate) packet_loss_pct: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct ProviderMeasurement {
    pub(crate) server_id: String,
    pub(crate) server_name: String,
    pub(crate) isp: String,
    pub(crate) distance_km: f64,
    pub(crate) latency_ms: f64,
    pub(crate) jitter_ms: f64,
    pub(crate) download_mbps: f64,
    pub(crate) upload_mbps: f64,
    pub(crate) packet_loss_percent: f64,
    pub(crate) success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl ProviderMeasurement {
    pub(crate) fn failed(endpoint: &CandidateEndpoint, error: impl Into<String>) -> Self {
        Self {
            server_id: endpoint.id.clone(),
            server_name: endpoint.name.clone(),
            isp: endpoint.sponsor.clone(),
            distance_km: endpoint.distance_km,
            latency_ms: 0.0,
            jitter_ms: 0.0,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            packet_loss_percent: 0.0,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Applies the acceptance rules to a raw measurement: latency must lie in
    /// `(0, 5000]` ms, throughput is clamped to a finite non-negative value, and at
    /// least one direction must reach 0.5 Mbps.
    pub(crate) fn from_raw(endpoint: &CandidateEndpoint, raw: RawMeasurement) -> Self {
        if !(raw.latency_ms > 0.0 && raw.latency_ms <= MAX_LATENCY_MS) {
            return Self::failed(endpoint, "invalid latency");
        }

        let download = clamp_speed(raw.download_mbps);
        let upload = clamp_speed(raw.upload_mbps);
        let packet_loss = if (0.0..=100.0).contains(&raw.packet_loss_pct) {
            raw.packet_loss_pct
        } else {
            0.0
        };
        let jitter = if raw.jitter_ms.is_finite() && raw.jitter_ms >= 0.0 {
            raw.jitter_ms
        } else {
            0.0
        };

        let success = download >= MIN_SPEED_MBPS || upload >= MIN_SPEED_MBPS;
        let error = if success {
            None
        } else {
            Some(format!("speeds too low: dl={:.1} ul={:.1}", download, upload))
        };

        Self {
            server_id: endpoint.id.clone(),
            server_name: endpoint.name.clone(),
            isp: endpoint.sponsor.clone(),
            distance_km: endpoint.distance_km,
            latency_ms: raw.latency_ms,
            jitter_ms: jitter,
            download_mbps: download,
            upload_mbps: upload,
            packet_loss_percent: packet_loss,
            success,
            error,
        }
    }
}

const MAX_LATENCY_MS: f64 = 5000.0;
const MIN_SPEED_MBPS: f64 = 0.5;

fn clamp_speed(mbps: f64) -> f64 {
    if mbps.is_finite() && mbps >= 0.0 {
        mbps
    } else {
        0.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub(crate) struct LocationAggregate {
    pub(crate) total_isps: usize,
    pub(crate) successful_isps: usize,
    pub(crate) success_rate_percent: f64,
    pub(crate) avg_latency_ms: f64,
    pub(crate) min_latency_ms: f64,
    pub(crate) max_latency_ms: f64,
    pub(crate) avg_download_mbps: f64,
    pub(crate) max_download_mbps: f64,
    pub(crate) avg_upload_mbps: f64,
    pub(crate) max_upload_mbps: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct LocationResult {
    pub(crate) location: Location,
    pub(crate) isp_results: Vec<ProviderMeasurement>,
    pub(crate) best_isp: Option<ProviderMeasurement>,
    pub(crate) aggregated_stats: LocationAggregate,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    pub(crate) servers_attempted: usize,
    pub(crate) test_duration_seconds: f64,
}

impl LocationResult {
    /// A result that never reached the measurement phase.
    pub(crate) fn failed(location: Location, error: impl Into<String>) -> Self {
        Self {
            location,
            isp_results: Vec::new(),
            best_isp: None,
            aggregated_stats: LocationAggregate::default(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
            servers_attempted: 0,
            test_duration_seconds: 0.0,
        }
    }

    pub(crate) fn latency_ms(&self) -> f64 {
        self.best_isp
            .as_ref()
            .map_or(self.aggregated_stats.avg_latency_ms, |b| b.latency_ms)
    }

    pub(crate) fn download_mbps(&self) -> f64 {
        self.best_isp
            .as_ref()
            .map_or(self.aggregated_stats.avg_download_mbps, |b| b.download_mbps)
    }

    pub(crate) fn upload_mbps(&self) -> f64 {
        self.best_isp
            .as_ref()
            .map_or(self.aggregated_stats.avg_upload_mbps, |b| b.upload_mbps)
    }

    /// Name of the server that produced the headline numbers.
    pub(crate) fn server_city(&self) -> &str {
        self.best_isp
            .as_ref()
            .map_or(self.location.name.as_str(), |b| b.server_name.as_str())
    }
}

/// Who ran the test, as seen from the outside.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct CallerInfo {
    pub(crate) ip: String,
    pub(crate) country: Option<String>,
    pub(crate) colo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct RunRecord {
    pub(crate) user_info: Option<CallerInfo>,
    pub(crate) tests: Vec<LocationResult>,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) version: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub(crate) struct RunSummary {
    pub(crate) total: usize,
    pub(crate) successful: usize,
    pub(crate) success_rate: f64,
    pub(crate) avg_latency: f64,
    pub(crate) avg_download: f64,
    pub(crate) avg_upload: f64,
    pub(crate) best_latency: Option<LocationResult>,
    pub(crate) best_download: Option<LocationResult>,
}
