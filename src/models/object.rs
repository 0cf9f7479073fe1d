//! Represents an object (file) stored in the local namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single object record within a bucket.
///
/// Holds the object's attributes, not the content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID, stable across overwrites of the same key.
    pub id: Uuid,

    /// Bucket (namespace directory) the object belongs to.
    pub bucket: String,

    /// Object key, unique within the bucket.
    pub key: String,

    /// Content type (MIME type) supplied at upload.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, hex encoded.
    pub etag: Option<String>,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}
