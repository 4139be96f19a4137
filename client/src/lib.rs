//! Native client for the product notifier.
//!
//! A [`Connection`] owns one websocket and one STOMP session. Each call to
//! [`Connection::subscribe`] returns a [`Subscription`], a lazy stream of the
//! messages published to its topic from that point on. Dropping the handle
//! unsubscribes; disconnecting ends every stream. [`UpdateLog`] renders the
//! received messages the way the browser page does.

pub mod connection;
pub mod message;
pub mod output;
pub mod scenarios;
pub mod subscription;
pub mod update_log;

pub use connection::Connection;
pub use message::Message;
pub use subscription::Subscription;
pub use update_log::UpdateLog;
