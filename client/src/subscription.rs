use futures_util::Stream;
use log::*;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use stomp::frame::{headers, Command, Frame};
use stomp::Topic;
use tokio::sync::mpsc;

use crate::connection::{Dispatcher, Outbound};
use crate::message::Message;

/// Handle to one active subscription.
///
/// Yields every message published to the topic after the subscription was
/// issued. The stream ends when the connection closes. Dropping the handle
/// unsubscribes.
pub struct Subscription {
    id: String,
    topic: Topic,
    messages: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Outbound>,
    dispatcher: Arc<Dispatcher>,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        topic: Topic,
        messages: mpsc::UnboundedReceiver<Message>,
        outbound: mpsc::UnboundedSender<Outbound>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            id,
            topic,
            messages,
            outbound,
            dispatcher,
            active: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// The next message, or `None` if nothing arrives within `timeout` or the
    /// stream has ended.
    pub async fn next_within(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.messages.recv())
            .await
            .ok()
            .flatten()
    }

    /// Stops delivery. Messages already in flight are discarded.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.dispatcher.subscriptions.remove(&self.id);

        let frame = Frame::new(Command::Unsubscribe).with_header(headers::ID, self.id.as_str());
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            trace!("Connection already closed, {} needs no UNSUBSCRIBE", self.id);
        } else {
            debug!("Unsubscribed {} from {}", self.id, self.topic);
        }
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().messages.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Instant;

    fn subscription() -> (
        Subscription,
        mpsc::UnboundedReceiver<Outbound>,
        Arc<Dispatcher>,
    ) {
        let dispatcher = Arc::new(Dispatcher::default());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.subscriptions.insert("sub-0".to_string(), tx);
        let subscription = Subscription::new(
            "sub-0".to_string(),
            Topic::product("42").unwrap(),
            rx,
            outbound,
            dispatcher.clone(),
        );
        (subscription, outbound_rx, dispatcher)
    }

    fn message(body: &str) -> Message {
        Message {
            destination: "/topic/product/42".to_string(),
            subscription: "sub-0".to_string(),
            message_id: "message-0".to_string(),
            body: body.to_string(),
            received_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn stream_yields_routed_messages_in_order() {
        let (mut subscription, _outbound_rx, dispatcher) = subscription();
        {
            let sender = dispatcher.subscriptions.get("sub-0").unwrap();
            sender.send(message("first")).unwrap();
            sender.send(message("second")).unwrap();
        }

        assert_eq!(subscription.next().await.unwrap().body, "first");
        assert_eq!(subscription.next().await.unwrap().body, "second");
    }

    #[tokio::test]
    async fn stream_ends_when_connection_forgets_it() {
        let (mut subscription, _outbound_rx, dispatcher) = subscription();

        dispatcher.subscriptions.clear();

        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn next_within_times_out_quietly() {
        let (mut subscription, _outbound_rx, _dispatcher) = subscription();

        assert!(subscription
            .next_within(Duration::from_millis(20))
            .await
            .is_none());
    }

    #[test]
    fn unsubscribe_sends_frame_and_stops_routing() {
        let (subscription, mut outbound_rx, dispatcher) = subscription();

        subscription.unsubscribe();

        let Ok(Outbound::Frame(frame)) = outbound_rx.try_recv() else {
            panic!("expected an UNSUBSCRIBE frame");
        };
        assert_eq!(frame.command, Command::Unsubscribe);
        assert_eq!(frame.header(headers::ID), Some("sub-0"));
        assert!(dispatcher.subscriptions.is_empty());
        // Exactly once, even though Drop ran after unsubscribe.
        assert!(outbound_rx.try_recv().is_err());
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let (subscription, mut outbound_rx, dispatcher) = subscription();

        drop(subscription);

        assert!(matches!(
            outbound_rx.try_recv(),
            Ok(Outbound::Frame(frame)) if frame.command == Command::Unsubscribe
        ));
        assert!(dispatcher.subscriptions.is_empty());
    }
}
