//! Alpaca Adapters
//!
//! - **Stream**: Stock quote/trade WebSocket (JSON codec) with auth,
//!   heartbeat, reconnect, and subscription replay
//! - **REST**: Latest-trade lookup used as a backfill source

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;

pub use auth::{AUTH_TIMEOUT, AuthError, AuthHandler, AuthState, Credentials};
pub use codec::{CodecError, Decoded, DropReason, DroppedElement, JsonCodec};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatTracker};
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{AlpacaLatestTradeBackfill, DEFAULT_DATA_URL};
pub use stream::{StreamConfig, StreamConnection, StreamError, StreamEvent};
