use std::fs::{File as StdFile, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scopeguard::guard;
use tokio::task;
use tracing::warn;

use crate::models::RunRecord;

pub(crate) const LATEST_FILE: &str = "latest.json";

pub(crate) fn snapshot_name(timestamp: DateTime<Utc>) -> String {
    format!("results_{}.json", timestamp.format("%Y-%m-%d_%H-%M-%S"))
}

/// Writes the timestamped snapshot and then refreshes `latest.json`.
///
/// Only the snapshot is required to succeed; a failed `latest.json` update is
/// logged. Returns the snapshot path.
pub(crate) async fn persist_run(dir: &Path, record: &RunRecord) -> Result<PathBuf> {
    let snapshot = dir.join(snapshot_name(record.timestamp));
    save_record(&snapshot, record)
        .await
        .with_context(|| format!("save results to {}", snapshot.display()))?;

    let latest = dir.join(LATEST_FILE);
    if let Err(e) = save_record(&latest, record).await {
        warn!(path = %latest.display(), error = %e, "failed to update latest results");
    }
    Ok(snapshot)
}

/// Atomically replaces `path` with the pretty-printed record.
pub(crate) async fn save_record(path: &Path, record: &RunRecord) -> Result<()> {
    let path = path.to_path_buf();
    let record = record.clone();

    task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let cleanup = guard(tmp_path.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = std::io::BufWriter::new(&file);
            serde_json::to_writer_pretty(&mut writer, &record)?;
            writer.flush()?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;
        scopeguard::ScopeGuard::into_inner(cleanup);
        if let Some(parent) = path.parent() {
            if let Ok(dir) = StdFile::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    })
    .await??;

    Ok(())
}

pub(crate) async fn load_record(path: &Path) -> Result<RunRecord> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || -> Result<RunRecord> {
        let file = StdFile::open(&path).with_context(|| format!("open {}", path.display()))?;
        let record = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(record)
    })
    .await?
}
