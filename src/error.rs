use thiserror::Error;

/// Reasons a serial line does not yield a reading.
///
/// Everything except `DeadlineElapsed`, `StreamClosed` and `Io` comes from a
/// single line and is transient: the frame reader logs them and keeps reading.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("frame has no sensor element")]
    MissingSensor,
    #[error("frame has neither a three-phase nor a single-phase reading")]
    MissingWatts,
    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("no sensor configured for index {0}")]
    UnknownSensor(u32),
    #[error("reading for sensor {0} is out of range")]
    Overflow(u32),
    #[error("no valid frame before the deadline")]
    DeadlineElapsed,
    #[error("serial stream closed")]
    StreamClosed,
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True for errors caused by one bad line rather than by the stream itself.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            FrameError::DeadlineElapsed | FrameError::StreamClosed | FrameError::Io(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid bridge URL '{0}'")]
    InvalidUrl(String),
    #[error("bridge request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bridge returned HTTP {status} for key {key}")]
    Status {
        key: String,
        status: reqwest::StatusCode,
    },
    #[error("undecodable bridge response for key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("PVOutput request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("POST failed: {status} {reason} {body}")]
    Rejected {
        status: u16,
        reason: String,
        body: String,
    },
}
