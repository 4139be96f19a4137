use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::*;
use stomp::connection::{ConnectionId, FrameSender};
use stomp::error::{Error, Result};
use stomp::frame::{Command, Frame, FrameDecoder, HEARTBEAT};
use stomp::session::{Action, Session, SessionState};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::controller::message_controller;
use crate::AppState;

/// Websocket subprotocols understood by the endpoint, most recent first.
pub const STOMP_SUBPROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];

/// Number of negotiated heart-beat intervals a client may stay silent.
const HEARTBEAT_GRACE_FACTOR: u32 = 2;

/// Upgrades `/ws` to a STOMP session. Clients that request no subprotocol
/// are accepted as well.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.protocols(STOMP_SUBPROTOCOLS)
        .on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection_id = app_state.stomp_manager.register_connection(tx.clone());
    let (heartbeat_tx, heartbeat_rx) = watch::channel(None);
    let (ws_tx, ws_rx) = socket.split();

    let writer = tokio::spawn(write_frames(ws_tx, rx, heartbeat_rx));

    let mut connection =
        StompConnection::new(app_state.clone(), connection_id.clone(), tx, heartbeat_tx);
    connection.read_frames(ws_rx).await;

    // Once the registry and the connection have dropped their senders the
    // writer flushes whatever is queued (e.g. an ERROR frame) and closes.
    app_state.stomp_manager.unregister_connection(&connection_id);
    drop(connection);
    if let Err(e) = writer.await {
        warn!("Writer task for STOMP connection {} failed: {}", connection_id, e);
    }
}

/// Drains the connection's frame channel onto the socket and emits heart-beats
/// once the session has negotiated an outgoing interval.
async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    mut heartbeat: watch::Receiver<Option<Duration>>,
) {
    let mut ticker: Option<Interval> = None;
    let mut heartbeat_open = true;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.encode().into())).await.is_err() {
                    return;
                }
                // Any outgoing frame counts as a beat.
                if let Some(interval) = ticker.as_mut() {
                    interval.reset();
                }
            }
            changed = heartbeat.changed(), if heartbeat_open => {
                if changed.is_err() {
                    heartbeat_open = false;
                    continue;
                }
                ticker = (*heartbeat.borrow_and_update()).map(|period| {
                    let mut interval = time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval
                });
            }
            _ = next_tick(&mut ticker) => {
                if ws_tx.send(Message::Text(HEARTBEAT.into())).await.is_err() {
                    return;
                }
                trace!("Sent heart-beat");
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Reader half of one websocket: feeds decoded frames through the session and
/// carries out the resulting actions.
struct StompConnection {
    app_state: AppState,
    session: Session,
    decoder: FrameDecoder,
    outbound: FrameSender,
    heartbeat: watch::Sender<Option<Duration>>,
    /// Until CONNECT this is the handshake deadline, afterwards the heart-beat grace.
    read_timeout: Option<Duration>,
}

impl StompConnection {
    fn new(
        app_state: AppState,
        connection_id: ConnectionId,
        outbound: FrameSender,
        heartbeat: watch::Sender<Option<Duration>>,
    ) -> Self {
        let read_timeout = app_state.session_config.connect_timeout;
        let session = Session::new(
            connection_id,
            app_state.stomp_manager.clone(),
            app_state.session_config.clone(),
        );
        Self {
            app_state,
            session,
            decoder: FrameDecoder::default(),
            outbound,
            heartbeat,
            read_timeout,
        }
    }

    async fn read_frames(&mut self, mut ws_rx: SplitStream<WebSocket>) {
        loop {
            let next = match self.read_timeout {
                Some(limit) => match time::timeout(limit, ws_rx.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let missing = match self.session.state() {
                            SessionState::AwaitingConnect => "CONNECT",
                            _ => "heart-beat",
                        };
                        warn!(
                            "No {} from STOMP connection {} within {:?}, closing",
                            missing,
                            self.session.connection_id(),
                            limit
                        );
                        break;
                    }
                },
                None => ws_rx.next().await,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(
                        "Websocket error on STOMP connection {}: {}",
                        self.session.connection_id(),
                        e
                    );
                    break;
                }
                None => break,
            };

            let text = match message {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        self.fail(&Error::MalformedFrame("frame is not valid UTF-8".to_string()));
                        break;
                    }
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            match self.handle_text(&text).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => {
                    self.fail(&e);
                    break;
                }
            }
        }

        self.session.close();
    }

    /// Handles every frame completed by one websocket message, in order. A
    /// trailing partial frame waits for the next message.
    async fn handle_text(&mut self, text: &str) -> Result<Flow> {
        for frame in self.decoder.decode(text)? {
            trace!(
                "STOMP connection {} received {}",
                self.session.connection_id(),
                frame.command
            );
            let connecting = matches!(frame.command, Command::Connect | Command::Stomp);

            for action in self.session.handle(frame)? {
                match action {
                    Action::Reply(reply) => self.send(reply),
                    Action::Dispatch {
                        destination,
                        route,
                        body,
                    } => {
                        message_controller::dispatch(&self.app_state, &destination, &route, body)
                            .await?
                    }
                    Action::Close => return Ok(Flow::Close),
                }
            }

            if connecting {
                self.apply_heartbeat();
            }
        }
        Ok(Flow::Continue)
    }

    fn apply_heartbeat(&mut self) {
        let negotiated = self.session.heartbeat();
        self.read_timeout = negotiated
            .incoming
            .map(|interval| interval * HEARTBEAT_GRACE_FACTOR);
        if self.heartbeat.send(negotiated.outgoing).is_err() {
            trace!("Writer already gone, heart-beat not scheduled");
        }
        debug!(
            "STOMP connection {} heart-beat: outgoing {:?}, incoming {:?}",
            self.session.connection_id(),
            negotiated.outgoing,
            negotiated.incoming
        );
    }

    fn fail(&mut self, err: &Error) {
        warn!(
            "Closing STOMP connection {}: {}",
            self.session.connection_id(),
            err
        );
        let frame = self.session.error_frame(err);
        self.send(frame);
    }

    fn send(&self, frame: Frame) {
        if self.outbound.send(frame).is_err() {
            debug!(
                "STOMP connection {} is closed, dropping frame",
                self.session.connection_id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app_state;
    use stomp::frame::headers;
    use tokio::sync::mpsc::UnboundedReceiver;

    const CONNECT: &str = "CONNECT\naccept-version:1.1,1.2\nheart-beat:5000,20000\n\n\0";

    fn test_connection() -> (
        StompConnection,
        UnboundedReceiver<Frame>,
        watch::Receiver<Option<Duration>>,
    ) {
        let app_state = test_app_state();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = app_state.stomp_manager.register_connection(tx.clone());
        let (heartbeat_tx, heartbeat_rx) = watch::channel(None);
        (
            StompConnection::new(app_state, connection_id, tx, heartbeat_tx),
            rx,
            heartbeat_rx,
        )
    }

    #[tokio::test]
    async fn connect_replies_and_schedules_heartbeats() {
        let (mut connection, mut rx, heartbeat_rx) = test_connection();

        let flow = connection.handle_text(CONNECT).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let connected = rx.try_recv().unwrap();
        assert_eq!(connected.command, Command::Connected);
        assert_eq!(connected.header(headers::VERSION), Some("1.2"));
        // Server sends every max(10000, 20000) ms and expects max(5000, 10000) ms.
        assert_eq!(*heartbeat_rx.borrow(), Some(Duration::from_millis(20_000)));
        assert_eq!(connection.read_timeout, Some(Duration::from_millis(20_000)));
    }

    #[tokio::test]
    async fn app_destination_send_reaches_topic_subscribers() {
        let (mut connection, mut rx, _heartbeat_rx) = test_connection();
        connection.handle_text(CONNECT).await.unwrap();
        rx.try_recv().unwrap();

        let frames = "SUBSCRIBE\nid:sub-0\ndestination:/topic/product/42\n\n\0\
                      SEND\ndestination:/app/product/42\n\nrestock\0";
        connection.handle_text(frames).await.unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.command, Command::Message);
        assert_eq!(message.header(headers::DESTINATION), Some("/topic/product/42"));
        assert_eq!(message.header(headers::SUBSCRIPTION), Some("sub-0"));
        assert_eq!(message.body, "restock");
    }

    #[tokio::test]
    async fn unknown_app_destination_ends_with_error_frame() {
        let (mut connection, mut rx, _heartbeat_rx) = test_connection();
        connection.handle_text(CONNECT).await.unwrap();
        rx.try_recv().unwrap();

        let err = connection
            .handle_text("SEND\ndestination:/app/order/1\n\nx\0")
            .await
            .unwrap_err();
        connection.fail(&err);

        assert_eq!(err, Error::UnknownDestination("/app/order/1".to_string()));
        let error = rx.try_recv().unwrap();
        assert_eq!(error.command, Command::Error);
        assert!(error.header(headers::MESSAGE).is_some());
        assert_eq!(connection.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn frames_before_connect_are_refused() {
        let (mut connection, _rx, _heartbeat_rx) = test_connection();

        let err = connection
            .handle_text("SUBSCRIBE\nid:0\ndestination:/topic/product/1\n\n\0")
            .await
            .unwrap_err();

        assert_eq!(err, Error::NotConnected(Command::Subscribe));
    }

    #[tokio::test]
    async fn disconnect_acknowledges_receipt_then_closes() {
        let (mut connection, mut rx, _heartbeat_rx) = test_connection();
        connection.handle_text(CONNECT).await.unwrap();
        rx.try_recv().unwrap();

        let flow = connection
            .handle_text("DISCONNECT\nreceipt:bye\n\n\0")
            .await
            .unwrap();

        assert_eq!(flow, Flow::Close);
        let receipt = rx.try_recv().unwrap();
        assert_eq!(receipt.command, Command::Receipt);
        assert_eq!(receipt.header(headers::RECEIPT_ID), Some("bye"));
    }

    #[tokio::test]
    async fn frame_split_across_messages_is_reassembled() {
        let (mut connection, mut rx, _heartbeat_rx) = test_connection();
        connection.handle_text(CONNECT).await.unwrap();
        rx.try_recv().unwrap();
        connection
            .handle_text("SUBSCRIBE\nid:sub-0\ndestination:/topic/product/1\n\n\0")
            .await
            .unwrap();

        let flow = connection
            .handle_text("SEND\ndestination:/topic/product/1\n\nres")
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(rx.try_recv().is_err());

        connection.handle_text("tock\0").await.unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.command, Command::Message);
        assert_eq!(message.body, "restock");
    }

    #[tokio::test]
    async fn handshake_deadline_applies_until_connect() {
        let (mut connection, mut rx, _heartbeat_rx) = test_connection();
        assert_eq!(connection.read_timeout, Some(Duration::from_secs(10)));

        connection
            .handle_text("CONNECT\naccept-version:1.2\nheart-beat:0,0\n\n\0")
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().command, Command::Connected);
        assert_eq!(connection.read_timeout, None);
    }

    #[tokio::test]
    async fn heartbeat_only_messages_are_ignored() {
        let (mut connection, mut rx, _heartbeat_rx) = test_connection();
        connection.handle_text(CONNECT).await.unwrap();
        rx.try_recv().unwrap();

        assert_eq!(connection.handle_text("\n").await.unwrap(), Flow::Continue);
        assert!(rx.try_recv().is_err());
    }
}
