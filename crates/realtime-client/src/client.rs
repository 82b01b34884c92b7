//! Public handle composing the wire codec and the subscription engine.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::connection::{next_ref, Connection};
use crate::error::RealtimeError;
use crate::protocol::{self, ChangeEvent, ChangeFilter};
use crate::types::{DispatchState, RealtimeConfig, SubscriptionHandle};

/// Client for a realtime change-feed endpoint.
///
/// Owns at most one websocket connection: [`RealtimeClient::connect`]
/// establishes the transport, [`RealtimeClient::subscribe`] joins one
/// channel per table and registers a handler, and
/// [`RealtimeClient::disconnect`] tears everything down. Handlers are
/// invoked from the background dispatch task, not the caller's task, so
/// they must be `Send + Sync` and must not block indefinitely.
pub struct RealtimeClient {
    config: RealtimeConfig,
    conn: Option<Connection>,
}

impl RealtimeClient {
    /// Client with default heartbeat and timeouts.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_config(RealtimeConfig::new(base_url, api_key))
    }

    pub fn with_config(config: RealtimeConfig) -> Self {
        Self { config, conn: None }
    }

    /// Open the websocket transport. No channel is joined until
    /// [`RealtimeClient::subscribe`].
    pub async fn connect(&mut self) -> Result<(), RealtimeError> {
        let conn = Connection::open(&self.config).await?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Join `realtime:<schema>:<table>` with a wildcard change filter and
    /// register `handler` for every event delivered on that topic.
    pub async fn subscribe<F>(
        &mut self,
        schema: &str,
        table: &str,
        handler: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(Map<String, Value>) + Send + Sync + 'static,
    {
        self.subscribe_with(schema, table, &[ChangeEvent::All], handler)
            .await
    }

    /// [`RealtimeClient::subscribe`] with explicit change kinds instead of
    /// the wildcard. An empty `events` slice falls back to the wildcard
    /// rather than joining a channel that filters everything out.
    pub async fn subscribe_with<F>(
        &mut self,
        schema: &str,
        table: &str,
        events: &[ChangeEvent],
        handler: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(Map<String, Value>) + Send + Sync + 'static,
    {
        let conn = self.conn.as_mut().ok_or(RealtimeError::NotConnected)?;
        let topic = protocol::channel_topic(schema, table);
        let filters: Vec<ChangeFilter> = if events.is_empty() {
            vec![ChangeFilter::all(schema, table)]
        } else {
            events
                .iter()
                .map(|&event| ChangeFilter {
                    event,
                    schema: schema.to_string(),
                    table: table.to_string(),
                })
                .collect()
        };
        let join = protocol::join_envelope(&topic, &filters, next_ref());
        conn.send(&join).await?;
        Ok(conn.register(&topic, Arc::new(handler)).await)
    }

    /// Leave the handle's channel and drop its handlers. Handlers are
    /// removed before the leave frame is sent, so nothing is delivered for
    /// this topic once the call returns.
    pub async fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), RealtimeError> {
        let conn = self.conn.as_ref().ok_or(RealtimeError::NotConnected)?;
        conn.unregister(handle.topic()).await;
        let leave = protocol::leave_envelope(handle.topic(), next_ref());
        conn.send(&leave).await
    }

    /// Close the connection and stop the dispatch loop. Idempotent; calling
    /// it without a connection is a no-op.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Dispatch loop state, or `None` before `connect`.
    pub fn dispatch_state(&self) -> Option<DispatchState> {
        self.conn.as_ref().map(Connection::state)
    }
}
