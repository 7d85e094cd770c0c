//! Client-facing queue operations.
//!
//! Every operation runs the same steps: validate the queue name, authorize
//! the secret, perform the operation, then classify the outcome into a
//! [`QueueResponse`]. Nothing here knows about HTTP.

use std::sync::Arc;

use crate::metrics::ResponseMetrics;

use super::error::QueueError;
use super::message::QueueMessage;
use super::registry::{is_valid_queue_name, QueueRegistry};

/// Payload attached to a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    Message(QueueMessage),
    Size(i64),
}

/// Outcome of one client operation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueResponse {
    /// Status classification: 200, 400, 403, 404 (queueExists only) or 500
    pub status: u16,
    /// Human-readable message
    pub message: String,
    pub result: bool,
    pub value: Option<ResponseValue>,
}

impl QueueResponse {
    fn new(status: u16, message: impl Into<String>, result: bool, value: Option<ResponseValue>) -> Self {
        Self {
            status,
            message: message.into(),
            result,
            value,
        }
    }

    fn outcome(result: bool) -> Self {
        Self::new(200, result.to_string(), result, None)
    }
}

/// Front-end agnostic implementation of the queue operations.
#[derive(Clone)]
pub struct QueueService {
    registry: Arc<QueueRegistry>,
}

impl QueueService {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    /// Validate the name, then authorize.
    async fn precheck(&self, secret: &str, queue_name: &str) -> Result<(), QueueError> {
        if !is_valid_queue_name(queue_name) {
            return Err(QueueError::InvalidName(queue_name.to_string()));
        }
        if !self.registry.authorize(secret, queue_name).await {
            return Err(QueueError::Unauthorized(queue_name.to_string()));
        }
        Ok(())
    }

    fn finish_response(
        operation: &str,
        queue_name: &str,
        outcome: Result<QueueResponse, QueueError>,
    ) -> QueueResponse {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                let message = match &e {
                    QueueError::InvalidName(name) => format!("Invalid queue name [{}]!", name),
                    QueueError::Unauthorized(_) => "Unauthorized!".to_string(),
                    _ => e.to_string(),
                };
                if status == 500 {
                    tracing::error!(
                        operation = %operation,
                        queue = %queue_name,
                        error = %e,
                        "Queue operation failed"
                    );
                }
                QueueResponse::new(status, message, false, None)
            }
        };

        ResponseMetrics::record(operation, response.status);
        response
    }

    pub async fn queue_exists(&self, secret: &str, queue_name: &str) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let exists = self.registry.queue_exists(queue_name).await?;
            let status = if exists { 200 } else { 404 };
            Ok::<_, QueueError>(QueueResponse::new(status, exists.to_string(), exists, None))
        }
        .await;
        Self::finish_response("queueExists", queue_name, outcome)
    }

    pub async fn init_queue(&self, secret: &str, queue_name: &str) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let created = self.registry.init_queue(queue_name).await?;
            Ok::<_, QueueError>(QueueResponse::outcome(created))
        }
        .await;
        Self::finish_response("initQueue", queue_name, outcome)
    }

    pub async fn queue(&self, secret: &str, queue_name: &str, content: &[u8]) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let queued = self.registry.queue(queue_name, content).await?;
            Ok::<_, QueueError>(QueueResponse::outcome(queued))
        }
        .await;
        Self::finish_response("queue", queue_name, outcome)
    }

    pub async fn requeue(&self, secret: &str, queue_name: &str, msg: &QueueMessage) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let moved = self.registry.requeue(queue_name, msg).await?;
            Ok::<_, QueueError>(QueueResponse::outcome(moved))
        }
        .await;
        Self::finish_response("requeue", queue_name, outcome)
    }

    pub async fn requeue_silent(
        &self,
        secret: &str,
        queue_name: &str,
        msg: &QueueMessage,
    ) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let moved = self.registry.requeue_silent(queue_name, msg).await?;
            Ok::<_, QueueError>(QueueResponse::outcome(moved))
        }
        .await;
        Self::finish_response("requeueSilent", queue_name, outcome)
    }

    pub async fn finish(&self, secret: &str, queue_name: &str, msg: &QueueMessage) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let removed = self.registry.finish(queue_name, msg).await?;
            Ok::<_, QueueError>(QueueResponse::outcome(removed))
        }
        .await;
        Self::finish_response("finish", queue_name, outcome)
    }

    pub async fn take(&self, secret: &str, queue_name: &str) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let taken = self.registry.take(queue_name).await?;
            let found = taken.is_some();
            Ok::<_, QueueError>(QueueResponse::new(200, "", found, taken.map(ResponseValue::Message)))
        }
        .await;
        Self::finish_response("take", queue_name, outcome)
    }

    pub async fn queue_size(&self, secret: &str, queue_name: &str) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let size = self.registry.queue_size(queue_name).await?;
            Ok::<_, QueueError>(QueueResponse::new(200, "", size >= 0, Some(ResponseValue::Size(size))))
        }
        .await;
        Self::finish_response("queueSize", queue_name, outcome)
    }

    pub async fn ephemeral_size(&self, secret: &str, queue_name: &str) -> QueueResponse {
        let outcome = async {
            self.precheck(secret, queue_name).await?;
            let size = self.registry.ephemeral_size(queue_name).await?;
            Ok::<_, QueueError>(QueueResponse::new(200, "", size >= 0, Some(ResponseValue::Size(size))))
        }
        .await;
        Self::finish_response("ephemeralSize", queue_name, outcome)
    }
}
