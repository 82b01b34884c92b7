//! Configuration and subscription lifecycle types.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::protocol::PROTOCOL_VSN;

/// Caller-supplied callback invoked with every decoded event object routed
/// to its subscription. Runs on the background dispatch task, so it must
/// not block indefinitely.
pub type Handler = Arc<dyn Fn(Map<String, Value>) + Send + Sync>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a realtime endpoint.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// Websocket origin, e.g. `wss://xyz.supabase.co`.
    pub base_url: String,
    /// API key sent as the `apikey` query parameter.
    pub api_key: String,
    /// Heartbeat interval in seconds (default: 25, 0 disables).
    pub heartbeat_interval_secs: u64,
    /// Timeout for the connect handshake in seconds (default: 15).
    pub connect_timeout_secs: u64,
    /// When set, every outbound envelope and raw inbound frame is logged at
    /// debug level. Observability only; never changes protocol behavior.
    pub debug: bool,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            heartbeat_interval_secs: 25,
            connect_timeout_secs: 15,
            debug: false,
        }
    }
}

impl RealtimeConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Build the websocket URL for the realtime endpoint.
    pub(crate) fn ws_url(&self) -> String {
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.api_key),
            PROTOCOL_VSN
        )
    }
}

// ---------------------------------------------------------------------------
// Dispatch Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of the per-connection dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No read loop running yet.
    Idle,
    /// Blocked on the next frame, delivering as they arrive.
    Reading,
    /// Transport closed or read failed. Terminal; a new connection is
    /// required to resume delivery.
    Stopped,
}

/// Handle to one topic subscription.
///
/// Lets callers observe the dispatch loop instead of racing on timing:
/// [`SubscriptionHandle::closed`] resolves once delivery for this
/// connection has stopped.
#[derive(Clone)]
pub struct SubscriptionHandle {
    pub(crate) topic: String,
    pub(crate) state: watch::Receiver<DispatchState>,
}

impl SubscriptionHandle {
    /// The channel topic this subscription joined.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current dispatch loop state.
    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Wait until the dispatch loop has stopped.
    pub async fn closed(&mut self) {
        while *self.state.borrow_and_update() != DispatchState::Stopped {
            if self.state.changed().await.is_err() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .finish()
    }
}
