use anyhow::{anyhow, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use url::Url;

use crate::config::AppConfig;

/// S3-compatible object store holding uploaded document files.
#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    public_base: String,
    documents_folder: String,
}

impl ObjectStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.s3_endpoint.clone())
            .force_path_style(true);
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let s3_config = s3_builder.build();

        let client = Client::from_conf(s3_config);

        Ok(Self {
            client,
            bucket: config.s3_bucket.clone(),
            public_base: config.public_storage_base(),
            documents_folder: config.documents_folder.clone(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn document_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.documents_folder, file_name)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    /// Storage key of a document file, recovered from its public URL.
    pub fn document_key_from_url(&self, file_url: &str) -> Result<String> {
        storage_key_from_url(&self.documents_folder, file_url)
            .ok_or_else(|| anyhow!("cannot derive storage key from {}", file_url))
    }

    /// Uploads a local file and returns its public URL.
    pub async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> Result<String> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| anyhow!("failed to read {}: {}", path.display(), err))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await?;

        Ok(self.public_url(key))
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}

fn storage_key_from_url(folder: &str, file_url: &str) -> Option<String> {
    let url = Url::parse(file_url).ok()?;
    let name = url.path_segments()?.last()?;
    if name.is_empty() {
        return None;
    }
    Some(format!("{}/{}", folder, name))
}
