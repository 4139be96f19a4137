use axum::http::StatusCode;
use serde::Serialize;
pub(crate) mod health_check_controller;
pub(crate) mod message_controller;
pub(crate) mod notification_controller;

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status_code: StatusCode, data: T) -> Self {
        Self {
            status_code: status_code.into(),
            data: Some(data),
        }
    }
}
