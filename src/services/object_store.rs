//! The object namespace the repository is built on.
//!
//! An [`ObjectStore`] is a flat collection of objects, each addressed by an
//! opaque key and carrying a content type and a string metadata map. The
//! repository only needs four primitives: put, paged list, head and get.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{collections::BTreeMap, io};
use thiserror::Error;

/// Metadata entry holding the lookup token of an object.
pub const TOKEN_METADATA_KEY: &str = "hash";

/// Largest listing page any adapter returns.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Per-object string metadata.
pub type Metadata = BTreeMap<String, String>;

/// Streamed object payload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid continuation token")]
    InvalidContinuation,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Remote(#[from] object_store::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Returned by a successful put.
#[derive(Debug, Clone)]
pub struct PutReceipt {
    pub key: String,
    /// Human-readable location of the stored object (`file://…`, `s3://…`).
    pub location: String,
    pub etag: Option<String>,
}

/// One page of a namespace listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass back to [`ObjectStore::list_page`] to continue; `None` when the
    /// listing is exhausted.
    pub next: Option<String>,
}

/// Object attributes without the body.
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub key: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub metadata: Metadata,
}

/// Object body ready to be streamed out.
pub struct ObjectBody {
    pub head: ObjectHead,
    pub stream: ByteStream,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Short name of the bucket or container, for display.
    fn bucket(&self) -> &str;

    /// Create or overwrite `key`.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
        metadata: &Metadata,
    ) -> StoreResult<PutReceipt>;

    /// List object keys, starting after `continuation` when given.
    async fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage>;

    async fn head_object(&self, key: &str) -> StoreResult<ObjectHead>;

    async fn get_object(&self, key: &str) -> StoreResult<ObjectBody>;
}
