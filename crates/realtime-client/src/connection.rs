//! Subscription engine: owns the websocket halves, the topic routing table,
//! and the background dispatch loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::error::RealtimeError;
use crate::protocol::{self, Envelope};
use crate::types::{DispatchState, Handler, RealtimeConfig, SubscriptionHandle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;
type RouteTable = Arc<RwLock<HashMap<String, Vec<Handler>>>>;

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for protocol envelopes.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// How long `close` waits for the dispatch loop to drain before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One open websocket transport plus the subscriptions multiplexed on it.
///
/// The write half is shared between subscribe-time sends and the heartbeat
/// task behind a mutex so concurrent writes cannot interleave partial
/// frames. The read half is consumed by the dispatch loop, started lazily
/// by the first registration.
pub(crate) struct Connection {
    writer: Arc<Mutex<WsSink>>,
    reader: Option<WsSource>,
    routes: RouteTable,
    state_tx: Arc<watch::Sender<DispatchState>>,
    state_rx: watch::Receiver<DispatchState>,
    dispatch: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    debug: bool,
}

impl Connection {
    /// Open the websocket transport. Performs no channel join; every topic
    /// interest goes through [`Connection::register`].
    pub(crate) async fn open(config: &RealtimeConfig) -> Result<Self, RealtimeError> {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "connecting to realtime endpoint");

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            tokio_tungstenite::connect_async(&url),
        )
        .await
        .map_err(|_| RealtimeError::ConnectTimeout(config.connect_timeout_secs))?
        .map_err(RealtimeError::Connect)?;

        let (ws_write, ws_read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(ws_write));
        let (state_tx, state_rx) = watch::channel(DispatchState::Idle);

        let heartbeat = (config.heartbeat_interval_secs > 0).then(|| {
            tokio::spawn(heartbeat_task(
                Arc::clone(&writer),
                config.heartbeat_interval_secs,
            ))
        });

        Ok(Self {
            writer,
            reader: Some(ws_read),
            routes: Arc::new(RwLock::new(HashMap::new())),
            state_tx: Arc::new(state_tx),
            state_rx,
            dispatch: None,
            heartbeat,
            debug: config.debug,
        })
    }

    /// Serialize and send one envelope as a text frame.
    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(envelope)?;
        if self.debug {
            debug!(frame = %text, "sending frame");
        }
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(RealtimeError::Send)
    }

    /// Register a handler for a topic and make sure the dispatch loop is
    /// running. The first registration takes the read half and spawns it.
    pub(crate) async fn register(&mut self, topic: &str, handler: Handler) -> SubscriptionHandle {
        self.routes
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(handler);

        if let Some(source) = self.reader.take() {
            self.dispatch = Some(tokio::spawn(dispatch_loop(
                source,
                Arc::clone(&self.routes),
                Arc::clone(&self.state_tx),
                self.debug,
            )));
        }

        SubscriptionHandle {
            topic: topic.to_string(),
            state: self.state_rx.clone(),
        }
    }

    /// Drop every handler registered for a topic.
    pub(crate) async fn unregister(&self, topic: &str) {
        self.routes.write().await.remove(topic);
    }

    pub(crate) fn state(&self) -> DispatchState {
        *self.state_rx.borrow()
    }

    /// Close the transport and stop the background tasks. The close frame
    /// makes the blocked read return; a loop that still has not exited
    /// after [`CLOSE_GRACE`] is aborted.
    pub(crate) async fn close(mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = writer
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })))
                .await;
        }
        if let Some(mut dispatch) = self.dispatch.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut dispatch).await.is_err() {
                warn!("dispatch loop did not exit in time, aborting");
                dispatch.abort();
            }
        }
        let _ = self.state_tx.send(DispatchState::Stopped);
    }
}

// ---------------------------------------------------------------------------
// Dispatch Loop
// ---------------------------------------------------------------------------

/// Read frames until the transport errors, closes, or ends.
///
/// Each decoded object is routed by its `topic` field; frames that fail to
/// decode are dropped and the loop keeps reading. Handlers run on this task
/// synchronously, in frame-arrival order.
async fn dispatch_loop<S>(
    mut source: S,
    routes: RouteTable,
    state: Arc<watch::Sender<DispatchState>>,
    debug: bool,
) where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let _ = state.send(DispatchState::Reading);
    while let Some(next) = source.next().await {
        match next {
            Ok(WsMessage::Text(text)) => {
                if debug {
                    debug!(frame = %text, "received frame");
                }
                match protocol::parse_inbound(&text) {
                    Ok(message) => deliver(&routes, message).await,
                    Err(e) => trace!(error = %e, "dropping undecodable frame"),
                }
            }
            Ok(WsMessage::Close(_)) => {
                info!("server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    let _ = state.send(DispatchState::Stopped);
}

/// Route one decoded message. A `topic` field selects that topic's
/// handlers; a message without one fans out to every handler.
async fn deliver(routes: &RouteTable, message: Map<String, Value>) {
    let topic = message
        .get("topic")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let routes = routes.read().await;
    match topic.as_deref() {
        Some(topic) => {
            if let Some(handlers) = routes.get(topic) {
                invoke_all(handlers.iter().collect(), message);
            } else {
                trace!(topic = %topic, "no subscription for topic");
            }
        }
        None => {
            invoke_all(routes.values().flatten().collect(), message);
        }
    }
}

/// The last handler takes the message by move; only the rest clone it.
fn invoke_all(handlers: Vec<&Handler>, message: Map<String, Value>) {
    if let Some((last, rest)) = handlers.split_last() {
        for handler in rest {
            handler(message.clone());
        }
        last(message);
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(writer: Arc<Mutex<S>>, interval_secs: u64)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let envelope = protocol::heartbeat_envelope(next_ref());
        if let Ok(text) = serde_json::to_string(&envelope) {
            let mut writer = writer.lock().await;
            if writer.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    }
}
