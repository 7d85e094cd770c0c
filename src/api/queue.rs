//! Queue operation endpoints.
//!
//! Every endpoint answers HTTP 200 with the outcome classified inside the
//! body, so clients only have to parse one shape.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::metrics::ResponseMetrics;
use crate::server::AppState;

use super::models::{QueueRequest, WireResponse};

/// Unwrap the JSON body, or build the 400 response for a malformed one.
fn parse_request(
    operation: &str,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Result<QueueRequest, Json<WireResponse>> {
    match payload {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => {
            tracing::debug!(operation = %operation, error = %rejection, "Rejected request body");
            ResponseMetrics::record(operation, 400);
            Err(Json(WireResponse::bad_request(format!(
                "Invalid request: {}",
                rejection.body_text()
            ))))
        }
    }
}

fn invalid_content(operation: &str, err: base64::DecodeError) -> Json<WireResponse> {
    ResponseMetrics::record(operation, 400);
    Json(WireResponse::bad_request(format!("Invalid content: {}", err)))
}

/// POST /api/v1/queueExists
#[tracing::instrument(name = "http.queue_exists", skip_all)]
pub async fn queue_exists(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("queueExists", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = state
        .service
        .queue_exists(request.secret(), request.queue_name())
        .await;
    Json(response.into())
}

/// POST /api/v1/initQueue
#[tracing::instrument(name = "http.init_queue", skip_all)]
pub async fn init_queue(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("initQueue", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = state
        .service
        .init_queue(request.secret(), request.queue_name())
        .await;
    Json(response.into())
}

/// POST /api/v1/queue
#[tracing::instrument(name = "http.queue", skip_all)]
pub async fn queue(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("queue", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let content = match request.content_bytes() {
        Ok(content) => content,
        Err(e) => return invalid_content("queue", e),
    };

    let response = state
        .service
        .queue(request.secret(), request.queue_name(), &content)
        .await;
    Json(response.into())
}

/// POST /api/v1/requeue
#[tracing::instrument(name = "http.requeue", skip_all)]
pub async fn requeue(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("requeue", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let msg = match request.to_message() {
        Ok(msg) => msg,
        Err(e) => return invalid_content("requeue", e),
    };

    let response = state
        .service
        .requeue(request.secret(), request.queue_name(), &msg)
        .await;
    Json(response.into())
}

/// POST /api/v1/requeueSilent
#[tracing::instrument(name = "http.requeue_silent", skip_all)]
pub async fn requeue_silent(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("requeueSilent", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let msg = match request.to_message() {
        Ok(msg) => msg,
        Err(e) => return invalid_content("requeueSilent", e),
    };

    let response = state
        .service
        .requeue_silent(request.secret(), request.queue_name(), &msg)
        .await;
    Json(response.into())
}

/// POST /api/v1/finish
#[tracing::instrument(name = "http.finish", skip_all)]
pub async fn finish(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("finish", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let msg = match request.to_message() {
        Ok(msg) => msg,
        Err(e) => return invalid_content("finish", e),
    };

    let response = state
        .service
        .finish(request.secret(), request.queue_name(), &msg)
        .await;
    Json(response.into())
}

/// POST /api/v1/take
#[tracing::instrument(name = "http.take", skip_all)]
pub async fn take(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("take", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = state.service.take(request.secret(), request.queue_name()).await;
    Json(response.into())
}

/// POST /api/v1/queueSize
#[tracing::instrument(name = "http.queue_size", skip_all)]
pub async fn queue_size(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("queueSize", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = state
        .service
        .queue_size(request.secret(), request.queue_name())
        .await;
    Json(response.into())
}

/// POST /api/v1/ephemeralSize
#[tracing::instrument(name = "http.ephemeral_size", skip_all)]
pub async fn ephemeral_size(
    State(state): State<AppState>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Json<WireResponse> {
    let request = match parse_request("ephemeralSize", payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = state
        .service
        .ephemeral_size(request.secret(), request.queue_name())
        .await;
    Json(response.into())
}
