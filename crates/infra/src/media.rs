use std::path::{Component, Path, PathBuf};

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use voluntra_domain::ports::BoxFuture;
use voluntra_domain::ports::media::{MediaError, MediaStorage};

use crate::config::AppConfig;

/// Media objects stored as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalMediaStorage {
    root: PathBuf,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, object_key: &str) -> Result<PathBuf, MediaError> {
        let relative = Path::new(object_key);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if object_key.is_empty() || !safe {
            return Err(MediaError::Operation(format!(
                "invalid object key '{object_key}'"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl MediaStorage for LocalMediaStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    fn delete(&self, object_key: &str) -> BoxFuture<'_, Result<(), MediaError>> {
        let path = self.object_path(object_key);
        let object_key = object_key.to_string();
        Box::pin(async move {
            let path = path?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Err(MediaError::NotFound(object_key))
                }
                Err(err) => Err(MediaError::Operation(format!(
                    "failed to delete {}: {err}",
                    path.display()
                ))),
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct S3MediaConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

impl S3MediaConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let endpoint = Some(config.s3_endpoint.trim())
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string);
        Self {
            bucket: config.s3_bucket.clone(),
            region: config.s3_region.clone(),
            endpoint,
            access_key: config.s3_access_key.clone(),
            secret_key: config.s3_secret_key.clone(),
        }
    }
}

pub struct S3MediaStorage {
    client: Client,
    bucket: String,
}

impl S3MediaStorage {
    pub fn new(config: S3MediaConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "static",
        );
        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);
        if let Some(endpoint) = config.endpoint {
            // Custom endpoints (MinIO, R2) need path-style addressing.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
        }
    }
}

impl MediaStorage for S3MediaStorage {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn delete(&self, object_key: &str) -> BoxFuture<'_, Result<(), MediaError>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
                .map_err(|err| {
                    MediaError::Unavailable(format!("s3 delete of {object_key} failed: {err}"))
                })?;
            Ok(())
        })
    }
}
