//! STOMP broker infrastructure for real-time product and category updates.
//!
//! This crate provides the transport-independent half of the notification
//! server: the frame codec, topics, the connection registry, and the
//! per-connection protocol session. The websocket plumbing lives in the `web`
//! crate.
//!
//! # Architecture
//!
//! - **One connection per client**: a client opens a single websocket and
//!   multiplexes any number of subscriptions over it.
//! - **Topic index**: the registry maps each topic to the set of
//!   (connection, subscription) pairs currently bound to it, so a publish only
//!   touches interested connections.
//! - **Ephemeral messages**: a message is handed to the subscribers present at
//!   publish time and then forgotten. Late subscribers never see it.
//! - **Non-blocking fan-out**: each connection owns an unbounded frame channel
//!   drained by its writer task, so publishing never waits on a slow socket.
//!
//! # Message Flow
//!
//! 1. Client connects to `/ws` and sends `CONNECT`
//! 2. Connection registered with the [`Manager`], `CONNECTED` returned
//! 3. `SUBSCRIBE destination:/topic/product/42` binds a subscription
//! 4. A publisher (REST call, `SEND /app/product/42`, or a direct
//!    `SEND /topic/product/42`) reaches [`Manager::publish`]
//! 5. Every bound subscription receives one `MESSAGE` frame
//!
//! # Example: Publishing an update
//!
//! ```rust,ignore
//! use stomp::topic::Topic;
//!
//! let topic = Topic::product("42")?;
//! app_state.stomp_manager.publish(&topic, "restock");
//! ```
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry with topic index and type-safe ConnectionId
//! - `domain_event_handler`: routes `events::DomainEvent`s onto topics
//! - `error`: broker error type
//! - `frame`: STOMP frame encoding and decoding
//! - `manager`: high-level broker facade (delegates to ConnectionRegistry)
//! - `session`: per-connection protocol state machine
//! - `topic`: validated destinations

pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod frame;
pub mod manager;
pub mod session;
pub mod topic;

pub use error::Error;
pub use frame::{Command, Frame};
pub use manager::Manager;
pub use topic::{Topic, TopicKind};
