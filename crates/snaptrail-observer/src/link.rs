use async_trait::async_trait;
use thiserror::Error;

use snaptrail_common::protocol::{Reply, Request};

#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("coordinator link closed")]
    Closed,

    #[error("coordinator link failure: {0}")]
    Other(String),
}

/// The observer's only path to the coordinator. Request/reply, no shared
/// state; in the bridge this rides the page's WebSocket connection.
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    async fn ask(&self, request: Request) -> Result<Reply, LinkError>;
}
