//! Client for Supabase-style realtime change feeds over the Phoenix
//! Channels v1 protocol.
//!
//! Connects a websocket to `/realtime/v1/websocket`, joins one channel per
//! `(schema, table)` pair with a `postgres_changes` filter, and routes every
//! decoded event object to the handlers registered for its topic. A single
//! background dispatch task per connection reads frames in arrival order and
//! invokes handlers synchronously; handlers therefore run off the caller's
//! task and must not block indefinitely.
//!
//! Reconnection, token refresh, and the presence/broadcast channel kinds are
//! out of scope.

mod client;
mod connection;
pub mod error;
pub mod protocol;
mod types;

pub use client::RealtimeClient;
pub use error::{DecodeError, RealtimeError};
pub use protocol::{ChangeEvent, ChangeFilter, Envelope};
pub use types::{DispatchState, Handler, RealtimeConfig, SubscriptionHandle};
