use std::time::Instant;

use stomp::frame::{headers, Command, Frame};
use stomp::{Topic, TopicKind};

/// A `MESSAGE` frame delivered to one subscription.
#[derive(Debug, Clone)]
pub struct Message {
    pub destination: String,
    pub subscription: String,
    pub message_id: String,
    pub body: String,
    pub received_at: Instant,
}

impl Message {
    /// `None` unless `frame` is a `MESSAGE` addressed to a subscription.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        if frame.command != Command::Message {
            return None;
        }
        let subscription = frame.header(headers::SUBSCRIPTION)?.to_string();
        let destination = frame.header(headers::DESTINATION).unwrap_or_default().to_string();
        let message_id = frame.header(headers::MESSAGE_ID).unwrap_or_default().to_string();

        Some(Self {
            destination,
            subscription,
            message_id,
            body: frame.body,
            received_at: Instant::now(),
        })
    }

    pub fn topic_kind(&self) -> TopicKind {
        self.destination
            .parse::<Topic>()
            .map(|topic| topic.kind())
            .unwrap_or(TopicKind::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frame_is_converted() {
        let frame = Frame::new(Command::Message)
            .with_header(headers::DESTINATION, "/topic/category/7")
            .with_header(headers::SUBSCRIPTION, "sub-3")
            .with_header(headers::MESSAGE_ID, "message-9")
            .with_body("renamed");

        let message = Message::from_frame(frame).unwrap();

        assert_eq!(message.subscription, "sub-3");
        assert_eq!(message.message_id, "message-9");
        assert_eq!(message.body, "renamed");
        assert_eq!(message.topic_kind(), TopicKind::Category);
    }

    #[test]
    fn other_frames_are_not_messages() {
        let receipt = Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, "r-1");
        let orphan = Frame::new(Command::Message).with_header(headers::DESTINATION, "/topic/product/1");

        assert!(Message::from_frame(receipt).is_none());
        assert!(Message::from_frame(orphan).is_none());
    }
}
