/// Errors raised while acquiring telemetry or waiting on print progress.
#[derive(Debug, thiserror::Error)]
pub enum PrintwatchError {
    #[error("Fetch from \"{endpoint}\" failed: {reason}")]
    RemoteFetch { endpoint: String, reason: String },

    #[error("\"{0}\" not in watchlist")]
    NotWatched(String),

    #[error("Not printing (job state: {0})")]
    NotPrinting(String),

    #[error("Print preparation failed (active leveling aborted)")]
    PrepareFailed,

    #[error("Duplicate series name in watchlist: \"{0}\"")]
    DuplicateName(String),

    #[error("Series name \"time\" is reserved")]
    ReservedName,

    #[error("Watch target \"{0}\" has no items")]
    EmptyTarget(String),

    #[error("Unable to access the printer")]
    ConnectionRefused,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Acquisition stopped")]
    StreamStopped,

    #[error("Timeout waiting for fresh data")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PrintwatchError {
    /// Shorthand for a transport failure against `endpoint`.
    pub fn fetch(endpoint: &str, reason: impl std::fmt::Display) -> Self {
        PrintwatchError::RemoteFetch {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}
