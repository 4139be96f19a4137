use anyhow::{anyhow, bail, Context, Result};
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stomp::frame::{headers, Command, Frame, FrameDecoder, HEARTBEAT, TEXT_PLAIN_UTF8};
use stomp::session::HeartBeat;
use stomp::Topic;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::message::Message;
use crate::subscription::Subscription;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";
const ACCEPT_VERSIONS: &str = "1.0,1.1,1.2";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(2);

/// What the client is willing to do: beat every 10s, hear from the server every 10s.
const CLIENT_HEARTBEAT: HeartBeat = HeartBeat {
    send_ms: 10_000,
    receive_ms: 10_000,
};

/// Work for the writer task.
pub(crate) enum Outbound {
    Frame(Frame),
    Close,
}

/// Routes incoming frames to the subscription and receipt waiters that own them.
#[derive(Default)]
pub(crate) struct Dispatcher {
    pub(crate) subscriptions: DashMap<String, mpsc::UnboundedSender<Message>>,
    receipts: DashMap<String, oneshot::Sender<()>>,
}

impl Dispatcher {
    fn route(&self, frame: Frame, label: &str) {
        match frame.command {
            Command::Message => {
                let Some(message) = Message::from_frame(frame) else {
                    debug!("{}: MESSAGE without subscription header ignored", label);
                    return;
                };
                match self.subscriptions.get(&message.subscription) {
                    Some(sender) => {
                        if sender.send(message).is_err() {
                            debug!("{}: subscription handle already dropped", label);
                        }
                    }
                    None => debug!(
                        "{}: message for inactive subscription {} ignored",
                        label, message.subscription
                    ),
                }
            }
            Command::Receipt => {
                if let Some((_, waiter)) = frame
                    .header(headers::RECEIPT_ID)
                    .and_then(|id| self.receipts.remove(id))
                {
                    let _ = waiter.send(());
                }
            }
            Command::Error => error!(
                "{}: server reported an error: {} {}",
                label,
                frame.header(headers::MESSAGE).unwrap_or_default(),
                frame.body
            ),
            other => debug!("{}: unexpected {} frame ignored", label, other),
        }
    }

    /// Ends every subscription stream and fails every pending receipt.
    fn close(&self) {
        self.subscriptions.clear();
        self.receipts.clear();
    }
}

/// One STOMP session over one websocket. Any number of subscriptions share it.
pub struct Connection {
    label: String,
    version: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    dispatcher: Arc<Dispatcher>,
    next_subscription: AtomicU64,
    next_receipt: AtomicU64,
}

impl Connection {
    /// Opens the websocket, performs the STOMP handshake and starts the reader
    /// and writer tasks. Fails when the server is unreachable or refuses the
    /// session.
    pub async fn establish(url: &str, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let mut request = url
            .into_client_request()
            .with_context(|| format!("Invalid websocket URL {}", url))?;
        let host = request.uri().host().unwrap_or("localhost").to_string();
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(STOMP_SUBPROTOCOLS));

        let (ws, _response) = connect_async(request)
            .await
            .with_context(|| format!("Failed to open websocket to {}", url))?;
        let (mut sink, mut stream) = ws.split();

        let connect = Frame::new(Command::Connect)
            .with_header(headers::ACCEPT_VERSION, ACCEPT_VERSIONS)
            .with_header(headers::HOST, host)
            .with_header(headers::HEART_BEAT, CLIENT_HEARTBEAT.header_value());
        sink.send(WsMessage::Text(connect.encode().into())).await?;

        let mut decoder = FrameDecoder::default();
        let connected = time::timeout(CONNECT_TIMEOUT, await_connected(&mut stream, &mut decoder))
            .await
            .map_err(|_| anyhow!("Timed out waiting for CONNECTED from {}", url))??;

        let server_heartbeat = match connected.header(headers::HEART_BEAT) {
            Some(value) => HeartBeat::parse(value)?,
            None => HeartBeat::default(),
        };
        let negotiated = CLIENT_HEARTBEAT.negotiate(&server_heartbeat);
        let version = connected.header(headers::VERSION).unwrap_or("1.0").to_string();
        info!(
            "{}: connected to {} (STOMP {}, session {})",
            label,
            url,
            version,
            connected.header(headers::SESSION).unwrap_or("-")
        );

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::default());
        tokio::spawn(write_frames(sink, outbound_rx, negotiated.outgoing));
        tokio::spawn(read_frames(stream, decoder, dispatcher.clone(), label.clone()));

        Ok(Self {
            label,
            version,
            outbound,
            dispatcher,
            next_subscription: AtomicU64::new(0),
            next_receipt: AtomicU64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Starts receiving messages published to `topic` from now on. The stream
    /// ends when the connection goes away.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (subscription, frame) = self.prepare_subscription(topic);
        if !self.send(frame) {
            warn!(
                "{}: connection closed, subscription to {} is inactive",
                self.label,
                subscription.topic()
            );
            self.dispatcher.subscriptions.remove(subscription.id());
        }
        subscription
    }

    /// Like [`Connection::subscribe`] but waits until the server confirms
    /// the subscription is bound.
    pub async fn subscribe_confirmed(&self, topic: Topic) -> Result<Subscription> {
        let (subscription, frame) = self.prepare_subscription(topic);
        self.send_with_receipt(frame).await?;
        Ok(subscription)
    }

    /// Sends `payload` to `destination`, e.g. `/app/product/42`. Delivery is
    /// best effort; a closed connection is only logged.
    pub fn publish(&self, destination: &str, payload: &str) {
        if !self.send(send_frame(destination, payload)) {
            warn!(
                "{}: connection closed, update for {} dropped",
                self.label, destination
            );
        }
    }

    /// Like [`Connection::publish`] but waits until the server has processed
    /// the frame.
    pub async fn publish_confirmed(&self, destination: &str, payload: &str) -> Result<()> {
        self.send_with_receipt(send_frame(destination, payload)).await
    }

    /// Sends `DISCONNECT`, waits briefly for its receipt and closes the socket.
    /// Every subscription stream ends.
    pub async fn disconnect(self) -> Result<()> {
        let acknowledged = self
            .send_with_receipt(Frame::new(Command::Disconnect))
            .await;
        self.close();
        info!("{}: disconnected", self.label);
        acknowledged
    }

    fn prepare_subscription(&self, topic: Topic) -> (Subscription, Frame) {
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        let (tx, rx) = mpsc::unbounded_channel();
        // Registered before SUBSCRIBE goes out so no message can slip past.
        self.dispatcher.subscriptions.insert(id.clone(), tx);

        let frame = Frame::new(Command::Subscribe)
            .with_header(headers::ID, id.as_str())
            .with_header(headers::DESTINATION, topic.as_str())
            .with_header("ack", "auto");
        debug!("{}: subscribing to {} as {}", self.label, topic, id);

        let subscription = Subscription::new(
            id,
            topic,
            rx,
            self.outbound.clone(),
            self.dispatcher.clone(),
        );
        (subscription, frame)
    }

    async fn send_with_receipt(&self, frame: Frame) -> Result<()> {
        let receipt_id = format!(
            "receipt-{}",
            self.next_receipt.fetch_add(1, Ordering::Relaxed)
        );
        let command = frame.command;
        let (tx, rx) = oneshot::channel();
        self.dispatcher.receipts.insert(receipt_id.clone(), tx);

        if !self.send(frame.with_header(headers::RECEIPT, receipt_id.as_str())) {
            self.dispatcher.receipts.remove(&receipt_id);
            bail!("{}: connection closed before {} was sent", self.label, command);
        }

        match time::timeout(RECEIPT_TIMEOUT, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => bail!("{}: connection closed before {} was confirmed", self.label, command),
            Err(_) => {
                self.dispatcher.receipts.remove(&receipt_id);
                bail!("{}: no receipt for {} within {:?}", self.label, command, RECEIPT_TIMEOUT)
            }
        }
    }

    fn send(&self, frame: Frame) -> bool {
        self.outbound.send(Outbound::Frame(frame)).is_ok()
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
        self.dispatcher.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_frame(destination: &str, payload: &str) -> Frame {
    Frame::new(Command::Send)
        .with_header(headers::DESTINATION, destination)
        .with_header(headers::CONTENT_TYPE, TEXT_PLAIN_UTF8)
        .with_body(payload)
}

/// Reads until the first frame, which must be `CONNECTED`. Data following it
/// stays in `decoder`.
async fn await_connected(
    stream: &mut SplitStream<WsStream>,
    decoder: &mut FrameDecoder,
) -> Result<Frame> {
    while let Some(message) = stream.next().await {
        let text = match message? {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec())?,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        if let Some(frame) = decoder.decode(&text)?.into_iter().next() {
            return match frame.command {
                Command::Connected => Ok(frame),
                Command::Error => bail!(
                    "Server refused the connection: {}",
                    frame.header(headers::MESSAGE).unwrap_or_default()
                ),
                other => bail!("Expected CONNECTED but received {}", other),
            };
        }
    }
    bail!("Connection closed during the STOMP handshake")
}

async fn write_frames(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    heartbeat: Option<Duration>,
) {
    let mut ticker = heartbeat.map(|period| {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(WsMessage::Text(frame.encode().into())).await.is_err() {
                        return;
                    }
                    if let Some(interval) = ticker.as_mut() {
                        interval.reset();
                    }
                }
                Some(Outbound::Close) | None => break,
            },
            _ = next_tick(&mut ticker) => {
                if sink.send(WsMessage::Text(HEARTBEAT.into())).await.is_err() {
                    return;
                }
            }
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    mut decoder: FrameDecoder,
    dispatcher: Arc<Dispatcher>,
    label: String,
) {
    while let Some(next) = stream.next().await {
        let text = match next {
            Ok(WsMessage::Text(text)) => text.to_string(),
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("{}: ignoring binary message that is not UTF-8", label);
                    continue;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("{}: websocket error: {}", label, e);
                break;
            }
        };

        match decoder.decode(&text) {
            Ok(frames) => {
                for frame in frames {
                    dispatcher.route(frame, &label);
                }
            }
            Err(e) => {
                warn!("{}: undecodable data from server: {}", label, e);
                break;
            }
        }
    }

    debug!("{}: connection closed by server", label);
    dispatcher.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_frame(subscription: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header(headers::DESTINATION, "/topic/product/42")
            .with_header(headers::SUBSCRIPTION, subscription)
            .with_header(headers::MESSAGE_ID, "message-0")
            .with_body(body)
    }

    #[test]
    fn messages_are_routed_by_subscription_id() {
        let dispatcher = Dispatcher::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.subscriptions.insert("sub-0".to_string(), tx);

        dispatcher.route(message_frame("sub-0", "restock"), "test");
        dispatcher.route(message_frame("sub-1", "elsewhere"), "test");

        assert_eq!(rx.try_recv().unwrap().body, "restock");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn receipts_wake_their_waiter() {
        let dispatcher = Dispatcher::default();
        let (tx, rx) = oneshot::channel();
        dispatcher.receipts.insert("receipt-0".to_string(), tx);

        dispatcher.route(
            Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, "receipt-0"),
            "test",
        );

        assert!(rx.await.is_ok());
        assert!(dispatcher.receipts.is_empty());
    }

    #[tokio::test]
    async fn close_ends_streams_and_pending_receipts() {
        let dispatcher = Dispatcher::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.subscriptions.insert("sub-0".to_string(), tx);
        let (receipt_tx, receipt_rx) = oneshot::channel();
        dispatcher.receipts.insert("receipt-0".to_string(), receipt_tx);

        dispatcher.close();

        assert!(rx.recv().await.is_none());
        assert!(receipt_rx.await.is_err());
    }

    #[test]
    fn send_frames_carry_a_text_content_type() {
        let frame = send_frame("/app/product/42", "restock");

        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.header(headers::DESTINATION), Some("/app/product/42"));
        assert_eq!(frame.header(headers::CONTENT_TYPE), Some(TEXT_PLAIN_UTF8));
        assert_eq!(frame.body, "restock");
    }
}
