//! Remote object namespace backed by [`object_store::ObjectStore`].
//!
//! Used for the S3 backend. Lookup tokens travel as user metadata
//! (`x-amz-meta-hash` on S3) through [`Attribute::Metadata`].

use crate::services::object_store::{
    ListPage, MAX_PAGE_SIZE, Metadata, ObjectBody, ObjectHead, ObjectStore, PutReceipt,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::{
    Attribute, Attributes, GetOptions, GetResult, ObjectStore as RemoteBackend, PutMode,
    PutOptions, PutPayload, aws::AmazonS3Builder, path::Path,
};
use std::{io, sync::Arc};

/// Cloneable handle to any `object_store` backend.
#[derive(Clone, Debug)]
pub struct RemoteObjectStore {
    inner: Arc<dyn RemoteBackend>,
    bucket: String,
    scheme: &'static str,
    page_size: usize,
}

impl RemoteObjectStore {
    pub fn new(
        inner: impl RemoteBackend,
        scheme: &'static str,
        bucket: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(inner),
            bucket: bucket.into(),
            scheme,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Build an S3 client for `bucket`.
    ///
    /// Credentials and region come from the usual `AWS_*` environment
    /// variables.
    pub fn s3(bucket: &str, page_size: usize) -> StoreResult<Self> {
        let s3 = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(s3, "s3", bucket, page_size))
    }

    async fn get_with(&self, key: &str, head: bool) -> StoreResult<GetResult> {
        let options = GetOptions {
            head,
            ..Default::default()
        };
        self.inner
            .get_opts(&object_path(key)?, options)
            .await
            .map_err(from_object_store)
    }
}

#[async_trait]
impl ObjectStore for RemoteObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[tracing::instrument(name = "remote.put", skip(self, body, metadata), fields(size = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
        metadata: &Metadata,
    ) -> StoreResult<PutReceipt> {
        let mut attributes = Attributes::new();
        if let Some(ct) = content_type {
            attributes.insert(Attribute::ContentType, ct.to_string().into());
        }
        for (name, value) in metadata {
            attributes.insert(Attribute::Metadata(name.clone().into()), value.clone().into());
        }
        let opts = PutOptions {
            mode: PutMode::Overwrite,
            attributes,
            ..Default::default()
        };

        let path = object_path(key)?;
        let result = self
            .inner
            .put_opts(&path, PutPayload::from(body), opts)
            .await
            .map_err(from_object_store)?;

        Ok(PutReceipt {
            key: path.as_ref().to_string(),
            location: format!("{}://{}/{}", self.scheme, self.bucket, path.as_ref()),
            etag: result.e_tag,
        })
    }

    /// Continuation is the last key of the previous page; the backend lists
    /// keys strictly after it.
    #[tracing::instrument(name = "remote.list", skip(self))]
    async fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage> {
        let mut listing = match continuation {
            Some(after) => self.inner.list_with_offset(None, &object_path(after)?),
            None => self.inner.list(None),
        };

        let mut keys = Vec::with_capacity(self.page_size);
        while let Some(meta) = listing.try_next().await.map_err(from_object_store)? {
            keys.push(meta.location.as_ref().to_string());
            if keys.len() == self.page_size {
                break;
            }
        }

        let next = if keys.len() == self.page_size {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    #[tracing::instrument(name = "remote.head", skip(self))]
    async fn head_object(&self, key: &str) -> StoreResult<ObjectHead> {
        let result = self.get_with(key, true).await?;
        Ok(head_from(key, &result))
    }

    #[tracing::instrument(name = "remote.get", skip(self))]
    async fn get_object(&self, key: &str) -> StoreResult<ObjectBody> {
        let result = self.get_with(key, false).await?;
        let head = head_from(key, &result);
        let stream = result
            .into_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
            .boxed();
        Ok(ObjectBody { head, stream })
    }
}

/// Keys are taken verbatim. `Path::from` would percent-encode `%`, `#` and
/// friends, and a listed key would then no longer name its object.
fn object_path(key: &str) -> StoreResult<Path> {
    Path::parse(key).map_err(|err| StoreError::InvalidKey(err.to_string()))
}

fn head_from(key: &str, result: &GetResult) -> ObjectHead {
    let mut content_type = None;
    let mut metadata = Metadata::new();
    for (attribute, value) in result.attributes.iter() {
        match attribute {
            Attribute::ContentType => content_type = Some(value.to_string()),
            Attribute::Metadata(name) => {
                metadata.insert(name.to_string(), value.to_string());
            }
            _ => {}
        }
    }
    ObjectHead {
        key: key.to_string(),
        content_type,
        size: result.meta.size,
        metadata,
    }
}

fn from_object_store(err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { path, .. } => StoreError::NotFound(path),
        object_store::Error::InvalidPath { source } => StoreError::InvalidKey(source.to_string()),
        other => StoreError::Remote(other),
    }
}
