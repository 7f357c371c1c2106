use thiserror::Error;

/// Coarse classification of a failed poll cycle.
///
/// The poll loop logs the kind alongside the full error chain so that a
/// sustained outage is distinguishable from a payload-shape regression
/// without parsing log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Jenkins or Graphite unreachable, timed out, or rejected the request.
    Transport,
    /// A response arrived but did not match the expected shape.
    Decode,
    /// The metrics sink connection or write failed.
    Sink,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Decode => "decode",
            ErrorKind::Sink => "sink",
        }
    }
}

/// Errors raised inside one poll cycle.
///
/// Everything here is non-fatal at the process level: the orchestrator logs
/// it and retries at the next scheduled tick.
#[derive(Debug, Error)]
pub enum Error {
    #[error("jenkins request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {path}")]
    Status {
        status: reqwest::StatusCode,
        path: String,
    },

    #[error("decoding response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("graphite sink: {0}")]
    Sink(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) | Error::Status { .. } => ErrorKind::Transport,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Sink(_) => ErrorKind::Sink,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
