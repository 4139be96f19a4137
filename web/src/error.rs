use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use stomp::Error as StompError;

extern crate log;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Internal,
}

impl ErrorKind {
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// JSON body returned with every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetails {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: String,
}

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{:?}: {}", self.kind, self.message)
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        if status.is_server_error() {
            log::error!("{}: {}", self.message, self.details);
        } else {
            log::debug!("{}: {}", self.message, self.details);
        }

        let body = ErrorDetails {
            timestamp: Utc::now(),
            message: self.message,
            details: self.details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StompError> for Error {
    fn from(err: StompError) -> Self {
        let kind = match err {
            StompError::InvalidDestination(_) => ErrorKind::BadRequest,
            StompError::UnknownDestination(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        };
        let details = match kind {
            ErrorKind::BadRequest => "identifiers must be a single non-empty path segment",
            ErrorKind::NotFound => "no handler is registered for this destination",
            ErrorKind::Internal => "the broker could not process the request",
        };
        Self::new(kind, err.to_string(), details)
    }
}
