use thiserror::Error;

/// Why an endpoint lookup produced no usable list.
#[derive(Debug, Error)]
pub(crate) enum DirectoryError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("directory returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            DirectoryError::Status(status.as_u16())
        } else if e.is_decode() {
            DirectoryError::Decode(e.to_string())
        } else {
            DirectoryError::Transport(e.to_string())
        }
    }
}

/// Why a single provider could not be measured. The messages end up verbatim in
/// persisted results.
#[derive(Debug, Error)]
pub(crate) enum MeasureError {
    #[error("ping failed: {0}")]
    Ping(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("measurement timed out")]
    TimedOut,
}
