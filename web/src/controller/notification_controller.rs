use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::controller::ApiResponse;
use crate::{AppState, Error};
use events::DomainEvent;
use log::*;
use stomp::Topic;

/// The topic a notification was handed to.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublishedTopic {
    pub topic: String,
}

/// POST an update for a single product to its subscribers
#[utoipa::path(
    post,
    path = "/notifications/products/{id}",
    params(
        ("id" = String, Path, description = "Product identifier"),
    ),
    request_body(content = String, description = "Update payload, relayed verbatim", content_type = "text/plain"),
    responses(
        (status = 202, description = "Update handed to the current subscribers of /topic/product/{id}", body = PublishedTopic),
        (status = 400, description = "Invalid product identifier", body = crate::error::ErrorDetails),
    )
)]
pub async fn publish_product_update(
    State(app_state): State<AppState>,
    Path(product_id): Path<String>,
    payload: String,
) -> Result<impl IntoResponse, Error> {
    debug!("POST product update for {}", product_id);

    let topic = Topic::product(&product_id)?;
    app_state
        .event_publisher
        .publish(DomainEvent::product_updated(product_id, payload))
        .await;

    Ok(accepted(topic))
}

/// POST an update for a single category to its subscribers
#[utoipa::path(
    post,
    path = "/notifications/categories/{id}",
    params(
        ("id" = String, Path, description = "Category identifier"),
    ),
    request_body(content = String, description = "Update payload, relayed verbatim", content_type = "text/plain"),
    responses(
        (status = 202, description = "Update handed to the current subscribers of /topic/category/{id}", body = PublishedTopic),
        (status = 400, description = "Invalid category identifier", body = crate::error::ErrorDetails),
    )
)]
pub async fn publish_category_update(
    State(app_state): State<AppState>,
    Path(category_id): Path<String>,
    payload: String,
) -> Result<impl IntoResponse, Error> {
    debug!("POST category update for {}", category_id);

    let topic = Topic::category(&category_id)?;
    app_state
        .event_publisher
        .publish(DomainEvent::category_updated(category_id, payload))
        .await;

    Ok(accepted(topic))
}

fn accepted(topic: Topic) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(
            StatusCode::ACCEPTED,
            PublishedTopic {
                topic: topic.to_string(),
            },
        )),
    )
}
