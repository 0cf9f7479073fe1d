//! HTTP handlers and the state they share.

pub mod blob_handlers;
pub mod health_handlers;

use crate::services::blob_repository::{CallContext, KeyedBlobRepository};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: KeyedBlobRepository,
    pub request_timeout: Duration,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Context for one request: cancelled on shutdown or after `request_timeout`.
    pub fn call_context(&self) -> CallContext {
        CallContext::new(self.shutdown.child_token()).with_timeout(self.request_timeout)
    }
}
