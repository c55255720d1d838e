pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::app::ingest::{IngestBridge, IngestHooks};
use crate::config::AppConfig;
use crate::infra::{db::Db, media::MediaProcesses, storage::ObjectStorage};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub storage: ObjectStorage,
    pub media: MediaProcesses,
    pub ingest: Arc<dyn IngestHooks>,
    pub upload_dir: PathBuf,
    pub upload_max_bytes: usize,
    pub admin_token: Option<String>,
    pub ingest_hook_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub static_dir: PathBuf,
}

impl AppState {
    /// Connects every backing service and wires the ingest bridge.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let db = Db::connect(config).await?;
        let storage = ObjectStorage::new(config).await?;
        let media = MediaProcesses::new(config.media.clone());
        let ingest: Arc<dyn IngestHooks> = Arc::new(IngestBridge::new(db.clone(), media.clone()));

        tokio::fs::create_dir_all(&config.upload_dir).await?;

        Ok(Self {
            db,
            storage,
            media,
            ingest,
            upload_dir: config.upload_dir.clone(),
            upload_max_bytes: config.upload_max_bytes,
            admin_token: config.admin_token.clone(),
            ingest_hook_token: config.ingest_hook_token.clone(),
            paseto_access_key: config.paseto_access_key,
            access_ttl_minutes: config.access_ttl_minutes,
            static_dir: config.static_dir.clone(),
        })
    }
}
