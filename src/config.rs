use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use config::{Config, File};
use serde::Deserialize;

use crate::orchestrator::OrchestratorSettings;

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct MeasurementSettings {
    pub(crate) threads: usize,
    pub(crate) max_providers: usize,
    pub(crate) ping_count: usize,
    pub(crate) download_size: u32,
    pub(crate) upload_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub(crate) endpoint_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) provider_pause: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct Settings {
    pub(crate) output_dir: String,
    pub(crate) user_agent: String,
    pub(crate) directory_url: String,
    pub(crate) directory_limit: usize,
    pub(crate) trace_url: String,
    pub(crate) lookup_caller_info: bool,
    #[serde(with = "humantime_serde")]
    pub(crate) request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) location_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) inter_location_delay: Duration,
    pub(crate) measurement: MeasurementSettings,
}

impl Settings {
    /// Applies command line values on top of the loaded layers.
    pub(crate) fn with_overrides(
        mut self,
        output_dir: Option<&Path>,
        threads: Option<usize>,
        max_providers: Option<usize>,
    ) -> Self {
        if let Some(dir) = output_dir {
            self.output_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(threads) = threads {
            self.measurement.threads = threads;
        }
        if let Some(max) = max_providers {
            self.measurement.max_providers = max;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.measurement.max_providers == 0 {
            anyhow::bail!("measurement.max_providers must be at least 1");
        }
        if self.measurement.threads == 0 {
            anyhow::bail!("measurement.threads must be at least 1");
        }
        if self.measurement.ping_count == 0 {
            anyhow::bail!("measurement.ping_count must be at least 1");
        }
        Ok(())
    }

    pub(crate) fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_providers: self.measurement.max_providers,
            threads: self.measurement.threads,
            endpoint_timeout: self.measurement.endpoint_timeout,
            location_timeout: self.location_timeout,
            provider_pause: self.measurement.provider_pause,
        }
    }
}

pub(crate) fn load_settings() -> Result<Settings> {
    let settings = with_defaults(Config::builder())?
        .add_source(File::with_name("config/default.toml").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    let settings: Settings = settings.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(builder
        .set_default("output_dir", "results")?
        .set_default("user_agent", concat!("globeprobe/", env!("CARGO_PKG_VERSION")))?
        .set_default("directory_url", "https://www.speedtest.net/api/js/servers")?
        .set_default("directory_limit", 100)?
        .set_default("trace_url", "https://one.one.one.one")?
        .set_default("lookup_caller_info", true)?
        .set_default("request_timeout", "30s")?
        .set_default("location_timeout", "180s")?
        .set_default("inter_location_delay", "2s")?
        .set_default("measurement.threads", 2)?
        .set_default("measurement.max_providers", 5)?
        .set_default("measurement.ping_count", 10)?
        .set_default("measurement.download_size", 1500)?
        .set_default("measurement.upload_bytes", 4_000_000)?
        .set_default("measurement.endpoint_timeout", "60s")?
        .set_default("measurement.provider_pause", "1s")?)
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    #[test]
    fn defaults_cover_every_key() {
        let settings: Settings = with_defaults(Config::builder())
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.output_dir, "results");
        assert_eq!(settings.location_timeout, Duration::from_secs(180));
        assert_eq!(settings.measurement.max_providers, 5);
        assert_eq!(settings.measurement.endpoint_timeout, Duration::from_secs(60));
        assert_eq!(settings.orchestrator().provider_pause, Duration::from_secs(1));
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            output_dir = "/tmp/runs"
            location_timeout = "2m 30s"

            [measurement]
            threads = 4
            provider_pause = "0s"
        "#;
        let settings: Settings = with_defaults(Config::builder())
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.output_dir, "/tmp/runs");
        assert_eq!(settings.location_timeout, Duration::from_secs(150));
        assert_eq!(settings.measurement.threads, 4);
        assert!(settings.measurement.provider_pause.is_zero());
        assert_eq!(settings.measurement.ping_count, 10);
    }

    #[test]
    fn command_line_wins() {
        let settings: Settings = with_defaults(Config::builder())
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let settings = settings.with_overrides(Some(Path::new("out")), None, Some(2));
        assert_eq!(settings.output_dir, "out");
        assert_eq!(settings.measurement.threads, 2);
        assert_eq!(settings.orchestrator().max_providers, 2);
    }

    #[test]
    fn zero_providers_is_rejected() {
        let settings: Settings = with_defaults(Config::builder())
            .unwrap()
            .add_source(File::from_str("[measurement]\nmax_providers = 0", FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let err = settings.validate().unwrap_err();
        assert_eq!(err.to_string(), "measurement.max_providers must be at least 1");

        let settings = settings.with_overrides(None, None, Some(3));
        assert!(settings.validate().is_ok());
    }
}
