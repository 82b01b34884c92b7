//! Error types for the realtime client.

use tokio_tungstenite::tungstenite;

/// Errors surfaced to callers of [`crate::RealtimeClient`].
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("connection timed out after {0}s")]
    ConnectTimeout(u64),

    #[error("not connected")]
    NotConnected,

    #[error("websocket send failed: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("envelope encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A received frame could not be decoded as a JSON object.
///
/// Always recovered inside the dispatch loop: the frame is dropped and the
/// loop keeps reading. Never propagated to callers.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a json object")]
    NotAnObject,
}
