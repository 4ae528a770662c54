//! Error type for the server's I/O plumbing.
//!
//! Protocol violations by clients are not errors at this level; they are
//! handled inside the session state machine and only ever end that session.

use std::path::PathBuf;

/// Errors that can occur while binding, serving or persisting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket or file system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A save file or message could not be (de)serialised.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The certificate or key could not be turned into a TLS configuration.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// The WebSocket handshake or transport failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The save file was written by an incompatible format version.
    #[error("unsupported save format version {found} in {path:?} (expected {expected})")]
    SaveVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// The coordinator is no longer accepting work.
    #[error("server is shutting down")]
    ShuttingDown,
}
