//! STOMP frame codec.
//!
//! A frame is a command line, `name:value` header lines, a blank line, the body
//! and a terminating NUL. Lines may end in `\n` or `\r\n`. Bare EOLs between
//! frames are heart-beats and are skipped. [`FrameDecoder`] reassembles frames
//! split across transport messages; [`parse_frames`] expects whole frames.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Protocol versions this broker speaks, lowest first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1.0", "1.1", "1.2"];

/// A heart-beat is a single EOL outside of any frame.
pub const HEARTBEAT: &str = "\n";

/// Header names used by the broker.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

pub const TEXT_PLAIN_UTF8: &str = "text/plain;charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client commands
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,

    // Server commands
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Commands that only a server may emit.
    pub fn is_server_command(&self) -> bool {
        matches!(
            self,
            Command::Connected | Command::Message | Command::Receipt | Command::Error
        )
    }

    // CONNECT and CONNECTED headers are never escaped, for 1.0 compatibility.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(command: &str) -> Result<Command> {
        match command {
            "CONNECT" => Ok(Command::Connect),
            "STOMP" => Ok(Command::Stomp),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "ACK" => Ok(Command::Ack),
            "NACK" => Ok(Command::Nack),
            "BEGIN" => Ok(Command::Begin),
            "COMMIT" => Ok(Command::Commit),
            "ABORT" => Ok(Command::Abort),
            "DISCONNECT" => Ok(Command::Disconnect),
            "CONNECTED" => Ok(Command::Connected),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds an `ERROR` frame. The connection must be closed after sending it.
    pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
        Frame::new(Command::Error)
            .with_header(headers::MESSAGE, message)
            .with_header(headers::CONTENT_TYPE, TEXT_PLAIN_UTF8)
            .with_body(details)
    }

    /// Returns the value of the first header with this name. Later repetitions
    /// are ignored.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn require_header(&self, name: &'static str) -> Result<&str> {
        self.header(name).ok_or(Error::MissingHeader {
            command: self.command,
            header: name,
        })
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes the frame, adding `content-length` when a body is present and
    /// the header was not set explicitly.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                escape_into(&mut out, name);
                out.push(':');
                escape_into(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.header(headers::CONTENT_LENGTH).is_none() {
            out.push_str(headers::CONTENT_LENGTH);
            out.push(':');
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Largest partial frame a [`FrameDecoder`] buffers before giving up.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Parses every frame in `input`. Heart-beat EOLs before, between and after
/// frames are skipped; an input made only of heart-beats yields no frames.
/// A trailing partial frame is an error.
pub fn parse_frames(input: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            break;
        }
        match parse_frame(rest)? {
            Parsed::Complete(frame, remaining) => {
                frames.push(frame);
                rest = remaining;
            }
            Parsed::Incomplete(reason) => return Err(Error::MalformedFrame(reason.to_string())),
        }
    }

    Ok(frames)
}

/// Reassembles frames that arrive split over several transport messages.
///
/// Complete frames are returned as soon as their terminator is seen; the
/// unparsed tail is kept for the next call.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: String,
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_frame_bytes,
        }
    }

    pub fn decode(&mut self, chunk: &str) -> Result<Vec<Frame>> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        loop {
            let rest = self.buffer[consumed..].trim_start_matches(['\r', '\n']);
            consumed = self.buffer.len() - rest.len();
            if rest.is_empty() {
                break;
            }
            match parse_frame(rest)? {
                Parsed::Complete(frame, remaining) => {
                    frames.push(frame);
                    consumed = self.buffer.len() - remaining.len();
                }
                Parsed::Incomplete(_) => break,
            }
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_frame_bytes {
            return Err(Error::FrameTooLarge(self.max_frame_bytes));
        }
        Ok(frames)
    }

    /// Bytes of a partial frame waiting for the rest of its data.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

enum Parsed<'a> {
    Complete(Frame, &'a str),
    Incomplete(&'static str),
}

fn parse_frame(input: &str) -> Result<Parsed<'_>> {
    let Some((command_line, mut rest)) = next_line(input) else {
        return Ok(Parsed::Incomplete("missing command line"));
    };
    let command: Command = command_line.parse()?;
    let mut frame = Frame::new(command);
    let unescape_headers = command.escapes_headers();

    loop {
        let Some((line, after)) = next_line(rest) else {
            return Ok(Parsed::Incomplete("unterminated header block"));
        };
        rest = after;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::MalformedFrame(format!("header line without a colon: {}", line))
        })?;
        if unescape_headers {
            frame.headers.push((unescape(name)?, unescape(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = match frame.header(headers::CONTENT_LENGTH) {
        Some(value) => Some(value.trim().parse::<usize>().map_err(|_| {
            Error::InvalidHeader {
                header: headers::CONTENT_LENGTH.to_string(),
                value: value.to_string(),
            }
        })?),
        None => None,
    };

    let (body, remaining) = match content_length {
        Some(len) => {
            if rest.len() <= len {
                return Ok(Parsed::Incomplete("body shorter than content-length"));
            }
            if !rest.is_char_boundary(len) {
                return Err(Error::MalformedFrame(format!(
                    "body does not match content-length {}",
                    len
                )));
            }
            if rest.as_bytes()[len] != 0 {
                return Err(Error::MalformedFrame(
                    "body is not followed by a NUL octet".to_string(),
                ));
            }
            (&rest[..len], &rest[len + 1..])
        }
        None => match rest.find('\0') {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => return Ok(Parsed::Incomplete("missing NUL terminator")),
        },
    };

    frame.body = body.to_string();
    Ok(Parsed::Complete(frame, remaining))
}

fn next_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = &input[..idx];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, &input[idx + 1..]))
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(Error::MalformedFrame(format!(
                    "undefined escape sequence \\{}",
                    other
                )))
            }
            None => {
                return Err(Error::MalformedFrame(
                    "header ends inside an escape sequence".to_string(),
                ))
            }
        }
    }
    Ok(out)
}
