//! Queue access authorization.
//!
//! Every client request carries a secret and a queue name. The registry
//! consults an [`Authorizer`] before touching the queue. The default
//! [`AllowAll`] permits everything; deployments plug in their own policy.

use async_trait::async_trait;

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `secret` grants access to the (normalized) queue.
    async fn authorize(&self, secret: &str, queue_name: &str) -> bool;
}

/// Authorizer that permits every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _secret: &str, _queue_name: &str) -> bool {
        true
    }
}
