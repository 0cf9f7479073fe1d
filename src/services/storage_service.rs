//! src/services/storage_service.rs
//!
//! LocalObjectStore: a single-bucket object namespace backed by SQLite for
//! object records and metadata, and local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{metadata::ObjectMetadata, object::ObjectRecord},
    services::object_store::{
        ListPage, MAX_PAGE_SIZE, Metadata, ObjectBody, ObjectHead, ObjectStore, PutReceipt, StoreError,
        StoreResult,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// LocalObjectStore provides the namespace primitives the repository needs:
/// - Put an object (writes bytes to disk, upserts the record and its metadata)
/// - List keys page by page (ordered by key)
/// - Head an object (record plus metadata map)
/// - Get an object (head plus an open file streamed out)
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for records and metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,
    page_size: usize,
}

impl LocalObjectStore {
    /// Open the store for `bucket`, applying the schema and creating the
    /// bucket directory if needed.
    pub async fn open(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: &str,
        page_size: usize,
    ) -> StoreResult<Self> {
        ensure_bucket_name_safe(bucket)?;
        let store = Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        };
        store.migrate().await?;
        fs::create_dir_all(store.bucket_root()).await?;
        Ok(store)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|part| part == ".." || part == ".")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard identifiers for an object key.
    ///
    /// First two bytes of MD5(bucket/key) as lowercase hex (00–ff).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn location(&self, key: &str) -> String {
        format!("local://{}/{}", self.bucket, key)
    }

    async fn fetch_record(&self, key: &str) -> StoreResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, bucket, key, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE bucket = ? AND key = ?",
        )
        .bind(&self.bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn fetch_metadata(&self, object_id: Uuid) -> StoreResult<Metadata> {
        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT object_id, key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    /// Write the payload into a temp file beside its final location.
    async fn write_temp(&self, parent: &Path, body: &[u8]) -> StoreResult<PathBuf> {
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(tmp_path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload an object and replace its metadata.
    ///
    /// The record and metadata are written in one transaction which commits
    /// only after the payload has been renamed into place, so a failed write
    /// leaves the previous version readable.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
        metadata: &Metadata,
    ) -> StoreResult<PutReceipt> {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        let tmp_path = self.write_temp(&parent, &body).await?;

        let etag = format!("{:x}", md5::compute(&body));
        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Sqlx(err));
            }
        };

        let staged: Result<(), sqlx::Error> = async {
            let object_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO objects (
                    id, bucket, key, content_type, size_bytes, etag, last_modified
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(bucket, key) DO UPDATE SET
                    content_type = excluded.content_type,
                    size_bytes = excluded.size_bytes,
                    etag = excluded.etag,
                    last_modified = excluded.last_modified
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&self.bucket)
            .bind(key)
            .bind(content_type)
            .bind(body.len() as i64)
            .bind(&etag)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
                .bind(object_id)
                .execute(&mut *tx)
                .await?;
            for (name, value) in metadata {
                sqlx::query("INSERT INTO object_metadata (object_id, key, value) VALUES (?, ?, ?)")
                    .bind(object_id)
                    .bind(name)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = staged {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Sqlx(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        tx.commit().await?;
        debug!("stored {} ({} bytes)", file_path.display(), body.len());

        Ok(PutReceipt {
            key: key.to_string(),
            location: self.location(key),
            etag: Some(etag),
        })
    }

    /// List keys in ascending order, one page at a time.
    ///
    /// Continuation tokens are the base64 of the last key returned.
    async fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage> {
        let after = continuation.map(decode_continuation_token).transpose()?;
        let fetch_limit = self.page_size + 1;

        let mut keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM objects
             WHERE bucket = ? AND key > ?
             ORDER BY key ASC LIMIT ?",
        )
        .bind(&self.bucket)
        .bind(after.unwrap_or_default())
        .bind(fetch_limit as i64)
        .fetch_all(&*self.db)
        .await?;

        let mut next = None;
        if keys.len() == fetch_limit {
            keys.pop();
            next = keys.last().map(|last| encode_continuation_token(last));
        }

        Ok(ListPage { keys, next })
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectHead> {
        self.ensure_key_safe(key)?;
        let record = self.fetch_record(key).await?;
        let metadata = self.fetch_metadata(record.id).await?;
        Ok(ObjectHead {
            key: record.key,
            content_type: record.content_type,
            size: record.size_bytes.max(0) as u64,
            metadata,
        })
    }

    /// Returns the head and the payload file as a stream.
    ///
    /// A record whose payload file is missing is reported as NotFound.
    async fn get_object(&self, key: &str) -> StoreResult<ObjectBody> {
        let head = self.head_object(key).await?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(ObjectBody {
            head,
            stream: ReaderStream::new(file).boxed(),
        })
    }
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| -> StoreResult<()> {
        Err(StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }
    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> StoreResult<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(StoreError::InvalidContinuation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn test_store(page_size: usize) -> (LocalObjectStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = LocalObjectStore::open(Arc::new(db), dir.path(), "uploads", page_size)
            .await
            .unwrap();
        (store, dir)
    }

    fn meta(token: &str) -> Metadata {
        Metadata::from([("hash".to_string(), token.to_string())])
    }

    async fn read_all(body: ObjectBody) -> Vec<u8> {
        body.stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_head_and_get() {
        let (store, _dir) = test_store(10).await;
        let receipt = store
            .put_object("a.txt", Bytes::from("hello"), Some("text/plain"), &meta("t1"))
            .await
            .unwrap();
        assert_eq!(receipt.location, "local://uploads/a.txt");
        assert_eq!(receipt.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));

        let head = store.head_object("a.txt").await.unwrap();
        assert_eq!(head.size, 5);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.metadata.get("hash").map(String::as_str), Some("t1"));

        let body = store.get_object("a.txt").await.unwrap();
        assert_eq!(read_all(body).await, b"hello");
    }

    #[tokio::test]
    async fn overwrite_replaces_payload_and_metadata() {
        let (store, _dir) = test_store(10).await;
        store
            .put_object("a.txt", Bytes::from("one"), None, &meta("t1"))
            .await
            .unwrap();
        store
            .put_object("a.txt", Bytes::from("two!"), None, &meta("t2"))
            .await
            .unwrap();

        let head = store.head_object("a.txt").await.unwrap();
        assert_eq!(head.size, 4);
        assert_eq!(head.metadata.len(), 1);
        assert_eq!(head.metadata["hash"], "t2");
        let page = store.list_page(None).await.unwrap();
        assert_eq!(page.keys, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn list_pages_in_key_order() {
        let (store, _dir) = test_store(2).await;
        for key in ["c", "a", "e", "b", "d"] {
            store
                .put_object(key, Bytes::from(key), None, &Metadata::new())
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut continuation = None;
        loop {
            let page = store.list_page(continuation.as_deref()).await.unwrap();
            assert!(page.keys.len() <= 2);
            seen.extend(page.keys);
            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn bad_continuation_token_is_rejected() {
        let (store, _dir) = test_store(2).await;
        let err = store.list_page(Some("%%%")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidContinuation));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (store, _dir) = test_store(2).await;
        assert!(matches!(
            store.head_object("nope").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.get_object("nope").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let (store, _dir) = test_store(2).await;
        for key in ["", "/etc/passwd", "../escape", "a/../b", "..", "a\\b"] {
            let err = store
                .put_object(key, Bytes::from("x"), None, &Metadata::new())
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "{key}");
        }
    }

    #[tokio::test]
    async fn dotted_names_are_not_traversal() {
        let (store, _dir) = test_store(10).await;
        for key in ["v1..2.txt", "draft...pdf", "..hidden"] {
            store
                .put_object(key, Bytes::from("x"), None, &Metadata::new())
                .await
                .unwrap();
            assert_eq!(store.head_object(key).await.unwrap().key, key);
        }
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("uploads").is_ok());
        assert!(ensure_bucket_name_safe("my.bucket-01").is_ok());
        for bad in ["ab", "Uploads", "-up", "up.", "a..b", "a.-b", "192.168.0.1"] {
            assert!(ensure_bucket_name_safe(bad).is_err(), "{bad}");
        }
    }
}
