//! Rendered history of received updates, one HTML paragraph per message.

use stomp::TopicKind;

use crate::message::Message;

#[derive(Debug, Default, Clone)]
pub struct UpdateLog {
    entries: Vec<String>,
}

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders `message` and appends it, returning the new entry.
    pub fn append(&mut self, message: &Message) -> &str {
        self.entries.push(render(message.topic_kind(), &message.body));
        self.entries.last().map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_html(&self) -> String {
        self.entries.join("\n")
    }
}

/// `<p>Product Update: restock</p>`
pub fn render(kind: TopicKind, body: &str) -> String {
    format!("<p>{}: {}</p>", kind.label(), escape_html(body))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
