use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use statistical::mean;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::error::MeasureError;
use crate::models::{CandidateEndpoint, RawMeasurement};

/// Performs the ping/download/upload exchange against one endpoint.
#[async_trait]
pub(crate) trait MeasurementProvider: Send + Sync {
    async fn measure(
        &self,
        endpoint: &CandidateEndpoint,
        threads: usize,
        timeout: Duration,
    ) -> Result<RawMeasurement, MeasureError>;
}

/// Speedtest-style HTTP measurer: `latency.txt` round trips, `random<N>x<N>.jpg`
/// downloads and form POST uploads against the endpoint's `speedtest/` directory.
pub(crate) struct HttpMeasurer {
    client: Client,
    ping_count: usize,
    download_size: u32,
    upload_bytes: usize,
}

impl HttpMeasurer {
    pub(crate) fn new(client: Client, ping_count: usize, download_size: u32, upload_bytes: usize) -> Self {
        Self {
            client,
            ping_count: ping_count.max(1),
            download_size,
            upload_bytes,
        }
    }

    async fn ping(&self, base: &Url, timeout: Duration) -> Result<(f64, f64, f64), MeasureError> {
        let target = base
            .join("latency.txt")
            .map_err(|e| MeasureError::Ping(e.to_string()))?;

        let mut samples = Vec::with_capacity(self.ping_count);
        let mut last_error = None;
        for _ in 0..self.ping_count {
            let start = Instant::now();
            match self.round_trip(&target, timeout).await {
                Ok(()) => samples.push(start.elapsed().as_secs_f64() * 1000.0),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if samples.is_empty() {
            return Err(MeasureError::Ping(
                last_error.unwrap_or_else(|| "no replies".to_string()),
            ));
        }

        let latency = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let jitter = jitter(&samples);
        let loss = (self.ping_count - samples.len()) as f64 / self.ping_count as f64 * 100.0;
        Ok((latency, jitter, loss))
    }

    /// One round trip; the reply only counts once its body has been read.
    async fn round_trip(&self, url: &Url, timeout: Duration) -> Result<(), reqwest::Error> {
        self.client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(())
    }

    async fn download(&self, base: &Url, threads: usize, timeout: Duration) -> Result<f64, MeasureError> {
        let size = self.download_size;
        let target = base
            .join(&format!("random{}x{}.jpg", size, size))
            .map_err(|e| MeasureError::Download(e.to_string()))?;

        let start = Instant::now();
        let streams = (0..threads.max(1)).map(|_| {
            let request = self.client.get(target.clone()).timeout(timeout);
            async move {
                let resp = request.send().await?.error_for_status()?;
                let body = resp.bytes().await?;
                Ok::<usize, reqwest::Error>(body.len())
            }
        });
        let outcomes = join_all(streams).await;
        throughput(outcomes, start).map_err(MeasureError::Download)
    }

    async fn upload(&self, target: &Url, threads: usize, timeout: Duration) -> Result<f64, MeasureError> {
        let payload = upload_payload(self.upload_bytes);

        let start = Instant::now();
        let streams = (0..threads.max(1)).map(|_| {
            let len = payload.len();
            let request = self
                .client
                .post(target.clone())
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .timeout(timeout)
                .body(payload.clone());
            async move {
                request.send().await?.error_for_status()?;
                Ok::<usize, reqwest::Error>(len)
            }
        });
        let outcomes = join_all(streams).await;
        throughput(outcomes, start).map_err(MeasureError::Upload)
    }
}

#[async_trait]
impl MeasurementProvider for HttpMeasurer {
    async fn measure(
        &self,
        endpoint: &CandidateEndpoint,
        threads: usize,
        timeout: Duration,
    ) -> Result<RawMeasurement, MeasureError> {
        let upload_url = upload_url(endpoint).map_err(|e| MeasureError::Ping(e.to_string()))?;
        let base = upload_url
            .join(".")
            .map_err(|e| MeasureError::Ping(e.to_string()))?;

        let (latency_ms, jitter_ms, packet_loss_pct) = self.ping(&base, timeout).await?;
        let download_mbps = self.download(&base, threads, timeout).await?;
        let upload_mbps = self.upload(&upload_url, threads, timeout).await?;

        debug!(
            server = %endpoint.id,
            latency_ms,
            download_mbps,
            upload_mbps,
            "measurement finished"
        );

        Ok(RawMeasurement {
            latency_ms,
            jitter_ms,
            download_mbps,
            upload_mbps,
            packet_loss_pct,
        })
    }
}

/// The directory usually reports the upload URL; older entries only carry the host.
fn upload_url(endpoint: &CandidateEndpoint) -> Result<Url, url::ParseError> {
    if endpoint.url.is_empty() {
        Url::parse(&format!("http://{}/speedtest/upload.php", endpoint.host))
    } else {
        Url::parse(&endpoint.url)
    }
}

/// Mean absolute difference between consecutive samples.
fn jitter(samples: &[f64]) -> f64 {
    let diffs: Vec<f64> = samples.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    if diffs.is_empty() { 0.0 } else { mean(&diffs) }
}

fn upload_payload(len: usize) -> Vec<u8> {
    let mut payload = b"content1=".to_vec();
    payload.extend(
        b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ"
            .iter()
            .cycle()
            .take(len.saturating_sub(payload.len())),
    );
    payload
}

/// Mbps over all streams that completed; errors only if none did.
fn throughput(outcomes: Vec<Result<usize, reqwest::Error>>, start: Instant) -> Result<f64, String> {
    let elapsed = start.elapsed().as_secs_f64();
    let mut bytes = 0usize;
    let mut first_error = None;
    let mut completed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(n) => {
                bytes += n;
                completed += 1;
            }
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    if completed == 0 {
        return Err(first_error.unwrap_or_else(|| "no streams".to_string()));
    }
    if elapsed <= 0.0 {
        return Ok(0.0);
    }
    Ok(bytes as f64 * 8.0 / elapsed / 1_000_000.0)
}
