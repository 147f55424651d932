// src/store/s3.rs

//! S3-compatible object store
//!
//! Wraps the async `rust-s3` client behind the blocking [`ObjectStore`]
//! interface. One multi-threaded tokio runtime is shared by every store a
//! connector creates; worker threads call `block_on` on it concurrently.

use super::{ListPage, ObjectInfo, ObjectStore, Permission, StoreConnector};
use crate::error::{Error, Result};
use s3::bucket::Bucket as RemoteBucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

fn store_error(operation: &str, key: &str, e: S3Error) -> Error {
    match e {
        S3Error::HttpFailWithBody(404, _) => {
            Error::NotFoundError(format!("Object {} does not exist", key))
        }
        e => Error::StoreError(format!("{} {} failed: {}", operation, key, e)),
    }
}

fn check_status(operation: &str, key: &str, status: u16) -> Result<()> {
    match status {
        200..=299 => Ok(()),
        404 => Err(Error::NotFoundError(format!("Object {} does not exist", key))),
        code => Err(Error::StoreError(format!(
            "{} {} failed with HTTP {}",
            operation, key, code
        ))),
    }
}

/// One S3 bucket
pub struct S3Store {
    runtime: Arc<Runtime>,
    /// Writes objects with the bucket's default ACL
    private: Box<RemoteBucket>,
    /// Writes objects with a `public-read` canned ACL
    public: Box<RemoteBucket>,
}

impl S3Store {
    fn writer(&self, permission: Permission) -> &RemoteBucket {
        match permission {
            Permission::Private => &*self.private,
            Permission::PublicRead => &*self.public,
        }
    }
}

impl ObjectStore for S3Store {
    fn list_page(&self, prefix: &str, marker: Option<&str>, max_keys: usize) -> Result<ListPage> {
        let (result, status) = self
            .runtime
            .block_on(self.private.list_page(
                prefix.to_string(),
                None,
                None,
                marker.map(str::to_string),
                Some(max_keys),
            ))
            .map_err(|e| store_error("list", prefix, e))?;
        check_status("list", prefix, status)?;

        let objects = result
            .contents
            .into_iter()
            .map(|o| ObjectInfo {
                key: o.key,
                size: o.size,
                etag: o.e_tag,
                last_modified: Some(o.last_modified),
            })
            .collect();

        Ok(ListPage {
            objects,
            is_truncated: result.is_truncated,
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        match self.runtime.block_on(self.private.head_object(key)) {
            Ok((_, 404)) => Ok(false),
            Ok((_, status)) => check_status("head", key, status).map(|_| true),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(store_error("head", key, e)),
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .runtime
            .block_on(self.private.get_object(key))
            .map_err(|e| store_error("get", key, e))?;
        check_status("get", key, response.status_code())?;
        Ok(response.bytes().to_vec())
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str, permission: Permission) -> Result<()> {
        let response = self
            .runtime
            .block_on(
                self.writer(permission)
                    .put_object_with_content_type(key, data, content_type),
            )
            .map_err(|e| store_error("put", key, e))?;
        check_status("put", key, response.status_code())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .runtime
            .block_on(self.private.delete_object(key))
            .map_err(|e| store_error("delete", key, e))?;
        match response.status_code() {
            // Deleting a missing key is not an error on S3
            404 => Ok(()),
            status => check_status("delete", key, status),
        }
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        // rust-s3 has no multi-object delete; one request per key, one runtime entry per batch
        let failed: Vec<String> = self.runtime.block_on(async {
            let mut failed = Vec::new();
            for key in keys {
                match self.private.delete_object(key).await {
                    Ok(response) if matches!(response.status_code(), 200..=299 | 404) => {}
                    Ok(response) => failed.push(format!("{key}: HTTP {}", response.status_code())),
                    Err(e) => failed.push(format!("{key}: {e}")),
                }
            }
            failed
        });

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::StoreError(format!(
                "{} of {} deletes failed: {}",
                failed.len(),
                keys.len(),
                failed.join("; ")
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Builds [`S3Store`]s sharing region, endpoint and credentials
pub struct S3Connector {
    runtime: Arc<Runtime>,
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Connector {
    /// Resolve credentials from `profile`, or from the standard AWS chain
    pub fn new(
        region: &str,
        endpoint: Option<&str>,
        path_style: bool,
        profile: Option<&str>,
    ) -> Result<Self> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse::<Region>()
                .map_err(|e| Error::ConfigError(format!("Invalid region '{}': {}", region, e)))?,
        };

        let credentials = match profile {
            Some(profile) if !profile.is_empty() => Credentials::from_profile(Some(profile)),
            _ => Credentials::default(),
        }
        .map_err(|e| Error::ConfigError(format!("Failed to load S3 credentials: {}", e)))?;

        let runtime = Runtime::new()
            .map_err(|e| Error::InitError(format!("Failed to start S3 runtime: {}", e)))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            region,
            credentials,
            path_style,
        })
    }
}

impl StoreConnector for S3Connector {
    fn connect(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut private = RemoteBucket::new(bucket, self.region.clone(), self.credentials.clone())
            .map_err(|e| Error::InitError(format!("Failed to create S3 client for {}: {}", bucket, e)))?;
        if self.path_style {
            private = private.with_path_style();
        }

        let mut public = private.clone();
        public.add_header("x-amz-acl", Permission::PublicRead.as_acl());

        debug!("Connected to S3 bucket {} in {}", bucket, self.region);
        Ok(Arc::new(S3Store {
            runtime: Arc::clone(&self.runtime),
            private,
            public,
        }))
    }

    fn describe(&self) -> String {
        format!("s3:{}", self.region)
    }
}
