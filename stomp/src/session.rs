//! Per-connection STOMP protocol state machine.
//!
//! A [`Session`] consumes decoded client frames and answers with [`Action`]s for
//! the transport to carry out. It talks to the broker [`Manager`] directly for
//! subscriptions and broker-destination sends; sends to application
//! destinations are handed back as [`Action::Dispatch`] because they are
//! resolved by the application layer.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionId;
use crate::error::{Error, Result};
use crate::frame::{headers, Command, Frame, SUPPORTED_VERSIONS};
use crate::topic::{strip_destination_prefix, Topic, DEFAULT_BROKER_PREFIX};
use crate::Manager;

pub const DEFAULT_APP_PREFIX: &str = "/app";

/// How long a new transport may take to send `CONNECT`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A `heart-beat` header value: the smallest interval, in milliseconds, at
/// which the sender can send beats and the interval at which it would like to
/// receive them. Zero means "not at all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl HeartBeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidHeader {
            header: headers::HEART_BEAT.to_string(),
            value: value.to_string(),
        };
        let (send, receive) = value.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            send_ms: send.trim().parse().map_err(|_| invalid())?,
            receive_ms: receive.trim().parse().map_err(|_| invalid())?,
        })
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.send_ms, self.receive_ms)
    }

    /// Intervals seen from the side that owns `self`, given the peer's header.
    pub fn negotiate(&self, peer: &HeartBeat) -> NegotiatedHeartBeat {
        let interval = |ours: u64, theirs: u64| {
            (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)))
        };
        NegotiatedHeartBeat {
            outgoing: interval(self.send_ms, peer.receive_ms),
            incoming: interval(peer.send_ms, self.receive_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartBeat {
    /// How often we must send something.
    pub outgoing: Option<Duration>,
    /// How often we expect to hear from the peer.
    pub incoming: Option<Duration>,
}

/// Broker settings shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub app_destination_prefix: String,
    pub broker_destination_prefix: String,
    pub heartbeat: HeartBeat,
    /// `None` waits for `CONNECT` indefinitely.
    pub connect_timeout: Option<Duration>,
    pub server_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_destination_prefix: DEFAULT_APP_PREFIX.to_string(),
            broker_destination_prefix: DEFAULT_BROKER_PREFIX.to_string(),
            heartbeat: HeartBeat::new(10_000, 10_000),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            server_name: format!("product-notifier/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConnect,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write this frame to the client.
    Reply(Frame),
    /// A `SEND` to an application destination. `route` is the destination with
    /// the application prefix removed, e.g. `product/42`.
    Dispatch {
        destination: String,
        route: String,
        body: String,
    },
    /// Close the transport.
    Close,
}

pub struct Session {
    connection_id: ConnectionId,
    manager: Arc<Manager>,
    config: Arc<SessionConfig>,
    state: SessionState,
    version: Option<&'static str>,
    heartbeat: NegotiatedHeartBeat,
    pending_receipt: Option<String>,
}

impl Session {
    pub fn new(connection_id: ConnectionId, manager: Arc<Manager>, config: Arc<SessionConfig>) -> Self {
        Self {
            connection_id,
            manager,
            config,
            state: SessionState::AwaitingConnect,
            version: None,
            heartbeat: NegotiatedHeartBeat::default(),
            pending_receipt: None,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated protocol version, once connected.
    pub fn version(&self) -> Option<&'static str> {
        self.version
    }

    pub fn heartbeat(&self) -> NegotiatedHeartBeat {
        self.heartbeat
    }

    /// Process one client frame. On `Err` the caller must send
    /// [`Session::error_frame`] and close the transport.
    pub fn handle(&mut self, frame: Frame) -> Result<Vec<Action>> {
        if self.state == SessionState::Closed {
            return Ok(Vec::new());
        }
        self.pending_receipt = frame.header(headers::RECEIPT).map(str::to_string);

        if frame.command.is_server_command() {
            return Err(Error::UnexpectedCommand(frame.command));
        }

        let mut actions = match (self.state, frame.command) {
            (SessionState::AwaitingConnect, Command::Connect | Command::Stomp) => {
                vec![Action::Reply(self.connect(&frame)?)]
            }
            (SessionState::AwaitingConnect, other) => return Err(Error::NotConnected(other)),
            (_, Command::Connect | Command::Stomp) => return Err(Error::AlreadyConnected),
            (_, Command::Subscribe) => {
                self.subscribe(&frame)?;
                Vec::new()
            }
            (_, Command::Unsubscribe) => {
                let id = frame.require_header(headers::ID)?;
                self.manager.unsubscribe(&self.connection_id, id)?;
                Vec::new()
            }
            (_, Command::Send) => self.send(frame)?,
            // Auto acknowledgement, no transactions.
            (_, Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort) => {
                Vec::new()
            }
            (_, Command::Disconnect) => {
                self.state = SessionState::Closed;
                vec![Action::Close]
            }
            (_, server_command) => return Err(Error::UnexpectedCommand(server_command)),
        };

        if let Some(receipt_id) = self.pending_receipt.take() {
            let receipt = Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, receipt_id);
            let at = actions
                .iter()
                .position(|action| *action == Action::Close)
                .unwrap_or(actions.len());
            actions.insert(at, Action::Reply(receipt));
        }

        Ok(actions)
    }

    /// Builds the `ERROR` frame reporting `err` and marks the session closed.
    pub fn error_frame(&mut self, err: &Error) -> Frame {
        self.state = SessionState::Closed;
        let mut frame = Frame::error(err.to_string(), err.to_string());
        if let Some(receipt_id) = self.pending_receipt.take() {
            frame = frame.with_header(headers::RECEIPT_ID, receipt_id);
        }
        frame
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn connect(&mut self, frame: &Frame) -> Result<Frame> {
        let offered = frame.header(headers::ACCEPT_VERSION).unwrap_or("1.0");
        let version = negotiate_version(offered)
            .ok_or_else(|| Error::UnsupportedVersion(offered.to_string()))?;

        let client_heartbeat = match frame.header(headers::HEART_BEAT) {
            Some(value) => HeartBeat::parse(value)?,
            None => HeartBeat::default(),
        };
        self.heartbeat = self.config.heartbeat.negotiate(&client_heartbeat);
        self.version = Some(version);
        self.state = SessionState::Connected;

        Ok(Frame::new(Command::Connected)
            .with_header(headers::VERSION, version)
            .with_header(headers::HEART_BEAT, self.config.heartbeat.header_value())
            .with_header(headers::SERVER, self.config.server_name.as_str())
            .with_header(headers::SESSION, self.connection_id.as_str()))
    }

    fn subscribe(&mut self, frame: &Frame) -> Result<()> {
        let destination = frame.require_header(headers::DESTINATION)?;
        let id = match (frame.header(headers::ID), self.version) {
            (Some(id), _) => id,
            // STOMP 1.0 made the id optional; the destination identifies it then.
            (None, Some("1.0")) => destination,
            (None, _) => frame.require_header(headers::ID)?,
        };

        let topic = self.broker_topic(destination)?;
        self.manager
            .subscribe(&self.connection_id, id.to_string(), topic)
    }

    fn send(&mut self, frame: Frame) -> Result<Vec<Action>> {
        let destination = frame.require_header(headers::DESTINATION)?.to_string();

        if let Some(route) =
            strip_destination_prefix(&destination, &self.config.app_destination_prefix)
        {
            let route = route.to_string();
            return Ok(vec![Action::Dispatch {
                destination,
                route,
                body: frame.body,
            }]);
        }

        let topic = self.broker_topic(&destination)?;
        self.manager.publish(&topic, &frame.body);
        Ok(Vec::new())
    }

    fn broker_topic(&self, destination: &str) -> Result<Topic> {
        let topic = Topic::new(destination)?;
        if !topic.is_under(&self.config.broker_destination_prefix) {
            return Err(Error::InvalidDestination(destination.to_string()));
        }
        Ok(topic)
    }
}

/// Picks the highest supported version from a comma separated offer.
pub fn negotiate_version(offered: &str) -> Option<&'static str> {
    let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
    SUPPORTED_VERSIONS
        .iter()
        .rev()
        .find(|version| offered.contains(version))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn new_session() -> (Session, Arc<Manager>, UnboundedReceiver<Frame>) {
        let manager = Arc::new(Manager::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = manager.register_connection(tx);
        let session = Session::new(
            connection_id,
            manager.clone(),
            Arc::new(SessionConfig::default()),
        );
        (session, manager, rx)
    }

    fn connect_frame() -> Frame {
        Frame::new(Command::Connect)
            .with_header(headers::ACCEPT_VERSION, "1.1,1.2")
            .with_header(headers::HOST, "localhost")
            .with_header(headers::HEART_BEAT, "0,0")
    }

    fn connected_session() -> (Session, Arc<Manager>, UnboundedReceiver<Frame>) {
        let (mut session, manager, rx) = new_session();
        session.handle(connect_frame()).unwrap();
        (session, manager, rx)
    }

    fn subscribe_frame(id: &str, destination: &str) -> Frame {
        Frame::new(Command::Subscribe)
            .with_header(headers::ID, id)
            .with_header(headers::DESTINATION, destination)
    }

    #[test]
    fn connect_negotiates_highest_common_version() {
        let (mut session, _manager, _rx) = new_session();

        let actions = session.handle(connect_frame()).unwrap();

        let Action::Reply(connected) = &actions[0] else {
            panic!("expected CONNECTED reply, got {:?}", actions);
        };
        assert_eq!(connected.command, Command::Connected);
        assert_eq!(connected.header(headers::VERSION), Some("1.2"));
        assert_eq!(
            connected.header(headers::SESSION),
            Some(session.connection_id().as_str())
        );
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.version(), Some("1.2"));
    }

    #[test]
    fn connect_without_accept_version_means_1_0() {
        let (mut session, _manager, _rx) = new_session();

        session.handle(Frame::new(Command::Stomp)).unwrap();

        assert_eq!(session.version(), Some("1.0"));
    }

    #[test]
    fn unsupported_version_is_refused() {
        let (mut session, _manager, _rx) = new_session();
        let frame = Frame::new(Command::Connect).with_header(headers::ACCEPT_VERSION, "2.0");

        let err = session.handle(frame).unwrap_err();

        assert_eq!(err, Error::UnsupportedVersion("2.0".to_string()));
    }

    #[test]
    fn frames_before_connect_are_refused() {
        let (mut session, _manager, _rx) = new_session();

        let err = session
            .handle(subscribe_frame("sub-0", "/topic/product/42"))
            .unwrap_err();

        assert_eq!(err, Error::NotConnected(Command::Subscribe));
    }

    #[test]
    fn second_connect_is_refused() {
        let (mut session, _manager, _rx) = connected_session();

        assert_eq!(
            session.handle(connect_frame()).unwrap_err(),
            Error::AlreadyConnected
        );
    }

    #[test]
    fn heartbeat_negotiation_uses_the_slower_side() {
        let server = HeartBeat::new(10_000, 10_000);
        let client = HeartBeat::parse("4000,20000").unwrap();

        let negotiated = server.negotiate(&client);

        assert_eq!(negotiated.outgoing, Some(Duration::from_millis(20_000)));
        assert_eq!(negotiated.incoming, Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn heartbeat_zero_disables_that_direction() {
        let server = HeartBeat::new(10_000, 0);
        let client = HeartBeat::new(5_000, 5_000);

        let negotiated = server.negotiate(&client);

        assert_eq!(negotiated.outgoing, Some(Duration::from_millis(10_000)));
        assert_eq!(negotiated.incoming, None);
    }

    #[test]
    fn malformed_heartbeat_is_an_invalid_header() {
        assert!(matches!(
            HeartBeat::parse("soon"),
            Err(Error::InvalidHeader { .. })
        ));
    }

    #[test]
    fn subscribe_then_broker_send_delivers_message() {
        let (mut session, manager, mut rx) = connected_session();
        session
            .handle(subscribe_frame("sub-0", "/topic/product/42"))
            .unwrap();

        let send = Frame::new(Command::Send)
            .with_header(headers::DESTINATION, "/topic/product/42")
            .with_body("restock");
        assert!(session.handle(send).unwrap().is_empty());

        let message = rx.try_recv().unwrap();
        assert_eq!(message.command, Command::Message);
        assert_eq!(message.body, "restock");
        assert_eq!(
            manager.subscriber_count(&Topic::product("42").unwrap()),
            1
        );
    }

    #[test]
    fn subscribe_outside_broker_prefix_is_refused() {
        let (mut session, _manager, _rx) = connected_session();

        let err = session
            .handle(subscribe_frame("sub-0", "/queue/product/42"))
            .unwrap_err();

        assert_eq!(
            err,
            Error::InvalidDestination("/queue/product/42".to_string())
        );
    }

    #[test]
    fn subscribe_without_id_is_refused_after_1_0() {
        let (mut session, _manager, _rx) = connected_session();
        let frame =
            Frame::new(Command::Subscribe).with_header(headers::DESTINATION, "/topic/product/1");

        assert!(matches!(
            session.handle(frame),
            Err(Error::MissingHeader { header: "id", .. })
        ));
    }

    #[test]
    fn subscribe_without_id_uses_destination_on_1_0() {
        let (mut session, manager, _rx) = new_session();
        session.handle(Frame::new(Command::Connect)).unwrap();
        let frame =
            Frame::new(Command::Subscribe).with_header(headers::DESTINATION, "/topic/product/1");

        session.handle(frame).unwrap();
        manager
            .unsubscribe(session.connection_id(), "/topic/product/1")
            .unwrap();
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (mut session, manager, mut rx) = connected_session();
        session
            .handle(subscribe_frame("sub-0", "/topic/category/7"))
            .unwrap();
        session
            .handle(Frame::new(Command::Unsubscribe).with_header(headers::ID, "sub-0"))
            .unwrap();

        manager.publish(&Topic::category("7").unwrap(), "renamed");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn app_destination_send_is_dispatched() {
        let (mut session, _manager, _rx) = connected_session();
        let send = Frame::new(Command::Send)
            .with_header(headers::DESTINATION, "/app/product/42")
            .with_body("restock");

        let actions = session.handle(send).unwrap();

        assert_eq!(
            actions,
            vec![Action::Dispatch {
                destination: "/app/product/42".to_string(),
                route: "product/42".to_string(),
                body: "restock".to_string(),
            }]
        );
    }

    #[test]
    fn send_to_unknown_prefix_is_refused() {
        let (mut session, _manager, _rx) = connected_session();
        let send = Frame::new(Command::Send).with_header(headers::DESTINATION, "/queue/x");

        assert!(matches!(
            session.handle(send),
            Err(Error::InvalidDestination(_))
        ));
    }

    #[test]
    fn receipt_follows_the_processed_frame() {
        let (mut session, _manager, _rx) = connected_session();
        let frame = subscribe_frame("sub-0", "/topic/product/42").with_header(headers::RECEIPT, "r-1");

        let actions = session.handle(frame).unwrap();

        let Action::Reply(receipt) = &actions[0] else {
            panic!("expected RECEIPT, got {:?}", actions);
        };
        assert_eq!(receipt.command, Command::Receipt);
        assert_eq!(receipt.header(headers::RECEIPT_ID), Some("r-1"));
    }

    #[test]
    fn disconnect_sends_receipt_before_closing() {
        let (mut session, _manager, _rx) = connected_session();
        let frame = Frame::new(Command::Disconnect).with_header(headers::RECEIPT, "bye");

        let actions = session.handle(frame).unwrap();

        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], Action::Reply(f) if f.command == Command::Receipt));
        assert_eq!(actions[1], Action::Close);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn server_commands_from_client_are_refused() {
        let (mut session, _manager, _rx) = connected_session();

        assert_eq!(
            session.handle(Frame::new(Command::Message)).unwrap_err(),
            Error::UnexpectedCommand(Command::Message)
        );
    }

    #[test]
    fn error_frame_closes_session_and_echoes_receipt() {
        let (mut session, _manager, _rx) = connected_session();
        let frame = Frame::new(Command::Send).with_header(headers::RECEIPT, "r-9");

        let err = session.handle(frame).unwrap_err();
        let error = session.error_frame(&err);

        assert_eq!(error.command, Command::Error);
        assert_eq!(error.header(headers::RECEIPT_ID), Some("r-9"));
        assert!(error.header(headers::MESSAGE).is_some());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn acks_and_transactions_are_accepted() {
        let (mut session, _manager, _rx) = connected_session();

        for command in [Command::Ack, Command::Nack, Command::Begin, Command::Commit, Command::Abort] {
            assert!(session.handle(Frame::new(command)).unwrap().is_empty());
        }
    }

    #[test]
    fn version_negotiation_prefers_newest() {
        assert_eq!(negotiate_version("1.0,1.1,1.2"), Some("1.2"));
        assert_eq!(negotiate_version("1.0, 1.1"), Some("1.1"));
        assert_eq!(negotiate_version("3.0"), None);
    }
}
