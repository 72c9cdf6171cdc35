use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures inside the client transport. These never reach the frame callback
/// directly; the reconnection policy turns them into a terminal frame.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("invalid server URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(StatusCode),

    #[error("stream ended before a terminal frame")]
    UnexpectedEof,

    #[error("no frame received within {0:?}")]
    Stalled(Duration),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Character with id {0} not found")]
    UnknownPersona(i64),

    #[error("failed to read personas from {}: {source}", .path.display())]
    PersonaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid persona catalog: {0}")]
    InvalidCatalog(String),

    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion API error: {status} - {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("malformed completion payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing completion API key; set GROQ_API_KEY or pass --offline")]
    MissingApiKey,
}
