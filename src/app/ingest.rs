//! Bridge between the external media server and stream lifecycle state.
//!
//! The media server reports every publish and unpublish together with the
//! stream path it was published under; the stream key in that path is the only
//! credential a broadcaster presents.

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::streams::StreamService;
use crate::domain::stream::LiveState;
use crate::infra::db::Db;
use crate::infra::media::MediaProcesses;

/// One publish or unpublish notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    #[serde(default)]
    pub session_id: String,
    pub path: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// The connection may proceed. `went_live` is false when the stream already was live.
    Accept { stream_id: Uuid, went_live: bool },
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpublishOutcome {
    Ended(Uuid),
    AlreadyIdle(Uuid),
    UnknownKey,
}

/// Callbacks the media server drives; registered once at startup.
#[axum::async_trait]
pub trait IngestHooks: Send + Sync {
    async fn on_publish(&self, event: &IngestEvent) -> Result<PublishDecision>;
    async fn on_unpublish(&self, event: &IngestEvent) -> Result<UnpublishOutcome>;
}

#[derive(Clone)]
pub struct IngestBridge {
    streams: StreamService,
    media: MediaProcesses,
}

impl IngestBridge {
    pub fn new(db: Db, media: MediaProcesses) -> Self {
        Self {
            streams: StreamService::new(db),
            media,
        }
    }
}

#[axum::async_trait]
impl IngestHooks for IngestBridge {
    async fn on_publish(&self, event: &IngestEvent) -> Result<PublishDecision> {
        let Some(stream_key) = stream_key_from_path(&event.path) else {
            warn!(session_id = %event.session_id, path = %event.path, "publish path carries no stream key, rejecting");
            return Ok(PublishDecision::Reject);
        };

        let Some(stream) = self.streams.find_by_key(stream_key).await? else {
            warn!(
                session_id = %event.session_id,
                key = %key_hint(stream_key),
                "stream key not found, rejecting connection"
            );
            return Ok(PublishDecision::Reject);
        };

        let went_live = self.streams.transition(stream.id, LiveState::Live).await?;
        if went_live {
            info!(stream_id = %stream.id, title = %stream.title, session_id = %event.session_id, "stream is now live");
        } else {
            info!(stream_id = %stream.id, session_id = %event.session_id, "publish for a stream that is already live");
        }

        // Encoders are registered before the hook answers.
        self.media.start_for(stream.id, stream_key).await;

        Ok(PublishDecision::Accept {
            stream_id: stream.id,
            went_live,
        })
    }

    async fn on_unpublish(&self, event: &IngestEvent) -> Result<UnpublishOutcome> {
        let Some(stream_key) = stream_key_from_path(&event.path) else {
            return Ok(UnpublishOutcome::UnknownKey);
        };

        let Some(stream) = self.streams.find_by_key(stream_key).await? else {
            info!(session_id = %event.session_id, key = %key_hint(stream_key), "unpublish for an unknown stream key");
            return Ok(UnpublishOutcome::UnknownKey);
        };

        let ended = self.streams.transition(stream.id, LiveState::Idle).await?;
        let stopped = self.media.stop(stream.id);
        info!(stream_id = %stream.id, ended, stopped, "stream unpublished");

        Ok(if ended {
            UnpublishOutcome::Ended(stream.id)
        } else {
            UnpublishOutcome::AlreadyIdle(stream.id)
        })
    }
}

/// The stream key is the third `/`-separated segment of a stream path, so both
/// `/live/<key>` and `live/<instance>/<key>` resolve to `<key>`.
pub fn stream_key_from_path(path: &str) -> Option<&str> {
    let path = path.split('?').next().unwrap_or(path);
    path.split('/').nth(2).filter(|key| !key.is_empty())
}

fn key_hint(stream_key: &str) -> String {
    let prefix: String = stream_key.chars().take(4).collect();
    format!("{}…", prefix)
}
