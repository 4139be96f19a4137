//! Error types for the STOMP broker.

use std::fmt;

use crate::frame::Command;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding frames, running a session, or mutating the
/// connection registry.
///
/// Protocol errors are reported to the peer as an `ERROR` frame whose `message`
/// header is the `Display` output of the variant, after which the connection is
/// closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input could not be split into command, headers and body.
    MalformedFrame(String),

    /// A partial frame grew past the decoder's buffer limit.
    FrameTooLarge(usize),

    /// The command line named something that is not a STOMP command.
    UnknownCommand(String),

    /// A header required by the command was absent.
    MissingHeader {
        command: Command,
        header: &'static str,
    },

    /// A header was present but its value could not be used.
    InvalidHeader { header: String, value: String },

    /// None of the versions offered in `accept-version` is supported.
    UnsupportedVersion(String),

    /// A frame other than `CONNECT`/`STOMP` arrived before the handshake.
    NotConnected(Command),

    /// A second `CONNECT` arrived on an established session.
    AlreadyConnected,

    /// A command that only a server may send was received from a client.
    UnexpectedCommand(Command),

    /// The destination is not a valid topic or is outside the allowed prefixes.
    InvalidDestination(String),

    /// No application handler exists for the destination.
    UnknownDestination(String),

    /// The subscription id is already in use on this connection.
    DuplicateSubscription(String),

    /// The subscription id is not known on this connection.
    UnknownSubscription(String),

    /// The connection is not (or no longer) registered with the broker.
    UnknownConnection(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            Error::FrameTooLarge(limit) => {
                write!(f, "Frame exceeds the maximum size of {} bytes", limit)
            }
            Error::UnknownCommand(cmd) => write!(f, "Unknown command: {}", cmd),
            Error::MissingHeader { command, header } => {
                write!(f, "Missing '{}' header in {} frame", header, command)
            }
            Error::InvalidHeader { header, value } => {
                write!(f, "Invalid value for '{}' header: {}", header, value)
            }
            Error::UnsupportedVersion(offered) => write!(
                f,
                "Supported protocol versions are {}, client offered {}",
                crate::frame::SUPPORTED_VERSIONS.join(","),
                offered
            ),
            Error::NotConnected(cmd) => {
                write!(f, "Expected CONNECT or STOMP frame but received {}", cmd)
            }
            Error::AlreadyConnected => write!(f, "Session is already connected"),
            Error::UnexpectedCommand(cmd) => {
                write!(f, "{} frames may only be sent by a server", cmd)
            }
            Error::InvalidDestination(dest) => write!(f, "Invalid destination: {}", dest),
            Error::UnknownDestination(dest) => {
                write!(f, "No handler for destination: {}", dest)
            }
            Error::DuplicateSubscription(id) => {
                write!(f, "Subscription id already in use: {}", id)
            }
            Error::UnknownSubscription(id) => write!(f, "Unknown subscription id: {}", id),
            Error::UnknownConnection(id) => write!(f, "Unknown connection: {}", id),
        }
    }
}

impl std::error::Error for Error {}
