//! Blob storage gateway.
//!
//! The orchestrator only sees the [`BlobStore`] trait. The shipped
//! implementation, [`ObjectBlobStore`], sits on top of the `object_store`
//! crate and resolves each bucket to its own `ObjectStore` handle:
//!
//! | backend | bucket maps to |
//! |---------|----------------|
//! | S3      | an `AmazonS3` client for that bucket |
//! | Local   | `<root>/<bucket>/` on disk |
//! | Memory  | a process-local `InMemory` store |
//!
//! Handles are built on first use and cached for the life of the store.

use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Narrow interface to the object store holding inputs and outputs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `bucket/key` into the local file `dest`, returning its size.
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Upload the local file `src` to `bucket/key`.
    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), StorageError>;

    async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Clone)]
enum Backend {
    S3 {
        region: String,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
    Local {
        root: PathBuf,
    },
    Memory,
}

/// [`BlobStore`] backed by `object_store`.
pub struct ObjectBlobStore {
    backend: Backend,
    buckets: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectBlobStore {
    pub fn from_config(config: &StorageConfig) -> Self {
        let backend = match config.clone() {
            StorageConfig::S3 {
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            } => Backend::S3 {
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            },
            StorageConfig::Local { root } => Backend::Local { root },
            StorageConfig::Memory => Backend::Memory,
        };
        Self {
            backend,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// An empty in-memory store.
    pub fn in_memory() -> Self {
        Self::from_config(&StorageConfig::Memory)
    }

    async fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let cached = self.cached(bucket)?.get(bucket).cloned();
        if let Some(store) = cached {
            return Ok(store);
        }

        // Built outside the lock; a concurrent first use of the same bucket
        // keeps whichever handle was inserted first.
        let built = self.build_bucket(bucket).await?;
        let store = self
            .cached(bucket)?
            .entry(bucket.to_string())
            .or_insert(built)
            .clone();
        Ok(store)
    }

    fn cached(
        &self,
        bucket: &str,
    ) -> Result<MutexGuard<'_, HashMap<String, Arc<dyn ObjectStore>>>, StorageError> {
        self.buckets
            .lock()
            .map_err(|_| StorageError::Config(format!("bucket cache poisoned ({bucket})")))
    }

    async fn build_bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if bucket.is_empty() || bucket == "." || bucket == ".." || bucket.contains(['/', '\\']) {
            return Err(StorageError::Config(format!("invalid bucket name '{bucket}'")));
        }

        match &self.backend {
            Backend::S3 {
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_region(region);
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_virtual_hosted_style_request(false);
                }
                if *allow_http {
                    builder = builder.with_allow_http(true);
                }
                if let (Some(ak), Some(sk)) = (access_key_id, secret_access_key) {
                    builder = builder
                        .with_access_key_id(ak)
                        .with_secret_access_key(sk);
                }
                let store = builder
                    .build()
                    .map_err(|e| StorageError::Config(format!("S3 bucket '{bucket}': {e}")))?;
                Ok(Arc::new(store))
            }
            Backend::Local { root } => {
                // new_with_prefix wants an existing absolute directory.
                let dir = root.join(bucket);
                let io_err = |source: std::io::Error| StorageError::Io {
                    path: dir.clone(),
                    source,
                };
                tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
                let dir = std::path::absolute(&dir).map_err(io_err)?;
                let fs = LocalFileSystem::new_with_prefix(&dir)
                    .map_err(|e| StorageError::Config(format!("local bucket '{bucket}': {e}")))?;
                Ok(Arc::new(fs))
            }
            Backend::Memory => Ok(Arc::new(InMemory::new())),
        }
    }

    fn supports_attributes(&self) -> bool {
        !matches!(self.backend, Backend::Local { .. })
    }
}

fn store_path(bucket: &str, key: &str) -> Result<StorePath, StorageError> {
    StorePath::parse(key).map_err(|e| StorageError::Transfer {
        bucket: bucket.to_string(),
        key: key.to_string(),
        reason: format!("invalid key: {e}"),
    })
}

fn classify(bucket: &str, key: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        other => StorageError::Transfer {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        info!(bucket, key, local_path = %dest.display(), "Downloading object");
        let store = self.bucket(bucket).await?;
        let location = store_path(bucket, key)?;

        let io_err = |source: std::io::Error| StorageError::Io {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let result = store
            .get(&location)
            .await
            .map_err(|e| classify(bucket, key, e))?;
        let mut stream = result.into_stream();
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;

        let mut total: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(bucket, key, e))?;
            total += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;

        info!(bucket, key, size_bytes = total, "Download complete");
        Ok(total)
    }

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(src).await.map_err(|source| StorageError::Io {
            path: src.to_path_buf(),
            source,
        })?;
        let size = data.len();
        let store = self.bucket(bucket).await?;
        let location = store_path(bucket, key)?;

        store
            .put(&location, PutPayload::from(Bytes::from(data)))
            .await
            .map_err(|e| classify(bucket, key, e))?;

        debug!(bucket, key, size_bytes = size, "Upload complete");
        Ok(())
    }

    async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let store = self.bucket(bucket).await?;
        let location = store_path(bucket, key)?;

        let mut attributes = Attributes::new();
        if self.supports_attributes() {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        store
            .put_opts(&location, PutPayload::from(Bytes::from(bytes)), opts)
            .await
            .map_err(|e| classify(bucket, key, e))?;

        info!(bucket, key, content_type, "Object written");
        Ok(())
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let store = self.bucket(bucket).await?;
        let location = store_path(bucket, key)?;
        let bytes = store
            .get(&location)
            .await
            .map_err(|e| classify(bucket, key, e))?
            .bytes()
            .await
            .map_err(|e| classify(bucket, key, e))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let store = self.bucket(bucket).await?;
        let location = store_path(bucket, key)?;
        match store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(classify(bucket, key, e)),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let store = self.bucket(bucket).await?;
        let trimmed = prefix.trim_end_matches('/');
        let prefix_path = if trimmed.is_empty() {
            None
        } else {
            Some(store_path(bucket, trimmed)?)
        };

        let mut stream = store.list(prefix_path.as_ref());
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| classify(bucket, prefix, e))?;
            keys.push(meta.location.to_string());
        }
        keys.sort();
        Ok(keys)
    }
}
