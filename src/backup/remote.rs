//! Remote snapshot mirror.
//!
//! Snapshots are mirrored best-effort to an S3-compatible object store. The
//! engine only depends on the [`ObjectStore`] trait, so any blob store works.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::info;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    /// `Ok(None)` when the key does not exist; `Err` is reserved for real
    /// transport or auth failures.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// All keys under the store's snapshot prefix, as bare names.
    async fn list(&self) -> Result<Vec<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Create the backing bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> Result<()>;
}

/// S3-backed snapshot mirror.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Connect using the ambient AWS credential chain. `endpoint` overrides
    /// the S3 endpoint for MinIO-style deployments (path-style addressing).
    pub async fn connect(
        bucket: &str,
        region: Option<String>,
        endpoint: Option<String>,
        prefix: &str,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        info!(bucket = %bucket, "Connected to S3 snapshot mirror");
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("failed to upload {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(err).with_context(|| format!("failed to fetch {key}"));
            }
        };
        let bytes = output
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read body of {key}"))?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(""))
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("failed to list snapshot mirror")?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    // Strip the prefix back off so callers see bare names.
                    let name = key.rsplit('/').next().unwrap_or(key);
                    if !name.is_empty() {
                        keys.push(name.to_string());
                    }
                }
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .with_context(|| format!("failed to delete {key}"))?;
        Ok(())
    }

    async fn ensure_bucket(&self) -> Result<()> {
        let exists = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok();
        if !exists {
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .with_context(|| format!("failed to create bucket {}", self.bucket))?;
            info!(bucket = %self.bucket, "Created snapshot mirror bucket");
        }
        Ok(())
    }
}
