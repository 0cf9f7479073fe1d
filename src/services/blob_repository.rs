//! src/services/blob_repository.rs
//!
//! KeyedBlobRepository: stores uploads tagged with a keyword-derived lookup
//! token and finds them again by scanning the namespace metadata.
//!
//! Upload writes the object under its (sanitized) filename with
//! `metadata["hash"] = token`. Re-uploading a filename that already exists
//! overwrites it; two different files uploaded under the same keyword are
//! both kept and lookup returns whichever is listed first.
//!
//! Lookup pages through the listing and heads each candidate until one
//! carries the token. There is no index, so a lookup costs one head request
//! per object listed before the match.

use crate::services::{
    object_store::{Metadata, ObjectBody, ObjectStore, StoreError, TOKEN_METADATA_KEY},
    token_service::{self, ServerSecret},
};
use bytes::Bytes;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reference upload limit: 5 MiB.
pub const DEFAULT_SIZE_LIMIT: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("no object matches the supplied keyword")]
    NotFound,
    #[error("listing the object namespace failed: {0}")]
    List(#[source] StoreError),
    #[error("reading metadata of `{key}` failed: {source}")]
    Head { key: String, source: StoreError },
    #[error("writing `{key}` failed: {source}")]
    Put { key: String, source: StoreError },
    #[error("reading `{key}` failed: {source}")]
    Body { key: String, source: StoreError },
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out")]
    TimedOut,
}

impl RepositoryError {
    /// Malformed or oversized input; never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. } | Self::InvalidKey(_))
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// What to do when a candidate's metadata cannot be read during a scan.
///
/// Objects that vanish between listing and head are always skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UnreadablePolicy {
    /// Log and move on to the next candidate.
    #[default]
    Skip,
    /// Fail the whole lookup.
    Abort,
}

/// Cancellation signal and optional deadline bound to one operation.
///
/// Every store call made on behalf of the operation races both.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    async fn guard<F: Future>(&self, op: F) -> RepositoryResult<F::Output> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RepositoryError::Cancelled),
            _ = deadline => Err(RepositoryError::TimedOut),
            out = op => Ok(out),
        }
    }
}

/// Returned by a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub stored_key: String,
    pub location: String,
}

#[derive(Clone)]
pub struct KeyedBlobRepository {
    store: Arc<dyn ObjectStore>,
    secret: ServerSecret,
    size_limit: usize,
    on_unreadable: UnreadablePolicy,
}

impl KeyedBlobRepository {
    pub fn new(store: Arc<dyn ObjectStore>, secret: ServerSecret) -> Self {
        Self {
            store,
            secret,
            size_limit: DEFAULT_SIZE_LIMIT,
            on_unreadable: UnreadablePolicy::default(),
        }
    }

    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_unreadable_policy(mut self, policy: UnreadablePolicy) -> Self {
        self.on_unreadable = policy;
        self
    }

    pub fn size_limit(&self) -> usize {
        self.size_limit
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    /// Store `payload` tagged with the token for `keyword`.
    pub async fn upload(
        &self,
        ctx: &CallContext,
        keyword: &str,
        filename: Option<&str>,
        payload: Bytes,
        content_type: Option<&str>,
    ) -> RepositoryResult<UploadReceipt> {
        if payload.len() > self.size_limit {
            return Err(RepositoryError::PayloadTooLarge {
                size: payload.len(),
                limit: self.size_limit,
            });
        }

        let key = stored_key(filename);
        let token = token_service::derive(keyword, &self.secret);
        let metadata = Metadata::from([(TOKEN_METADATA_KEY.to_string(), token.to_string())]);
        let size = payload.len();

        let receipt = ctx
            .guard(self.store.put_object(&key, payload, content_type, &metadata))
            .await?
            .map_err(|source| match source {
                StoreError::InvalidKey(key) => RepositoryError::InvalidKey(key),
                source => RepositoryError::Put {
                    key: key.clone(),
                    source,
                },
            })?;

        info!(key = %receipt.key, size, etag = ?receipt.etag, "stored upload");
        Ok(UploadReceipt {
            stored_key: receipt.key,
            location: receipt.location,
        })
    }

    /// Find the first object tagged with the token for `keyword` and open
    /// its body.
    pub async fn lookup(&self, ctx: &CallContext, keyword: &str) -> RepositoryResult<ObjectBody> {
        let token = token_service::derive(keyword, &self.secret);
        let mut continuation: Option<String> = None;
        let mut scanned = 0usize;

        loop {
            let page = ctx
                .guard(self.store.list_page(continuation.as_deref()))
                .await?
                .map_err(RepositoryError::List)?;

            for key in page.keys {
                scanned += 1;
                let head = match ctx.guard(self.store.head_object(&key)).await? {
                    Ok(head) => head,
                    Err(StoreError::NotFound(_)) => {
                        debug!(key = %key, "object vanished during scan");
                        continue;
                    }
                    Err(source) => match self.on_unreadable {
                        UnreadablePolicy::Skip => {
                            warn!(key = %key, error = %source, "skipping object with unreadable metadata");
                            continue;
                        }
                        UnreadablePolicy::Abort => {
                            return Err(RepositoryError::Head { key, source });
                        }
                    },
                };

                let matched = head
                    .metadata
                    .get(TOKEN_METADATA_KEY)
                    .is_some_and(|candidate| token.matches(candidate));
                if !matched {
                    continue;
                }

                info!(key = %head.key, scanned, "lookup matched");
                return ctx
                    .guard(self.store.get_object(&head.key))
                    .await?
                    .map_err(|source| RepositoryError::Body {
                        key: head.key.clone(),
                        source,
                    });
            }

            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(scanned, "lookup found no matching object");
        Err(RepositoryError::NotFound)
    }

    /// Check that the namespace can be listed.
    pub async fn probe(&self, ctx: &CallContext) -> RepositoryResult<()> {
        ctx.guard(self.store.list_page(None))
            .await?
            .map(|_| ())
            .map_err(RepositoryError::List)
    }
}

/// Object key for an upload: the base name of the client's filename, or a
/// generated name when none is usable.
fn stored_key(filename: Option<&str>) -> String {
    filename
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload-{}", Uuid::new_v4()))
}
