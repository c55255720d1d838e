use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use super::{env_or, env_or_parse};

/// Settings for the external media server and the encoder processes spawned on publish.
#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub http_addr: String,
    pub media_root: PathBuf,
    pub rtmp_host: String,
    pub rtmp_port: u16,
    pub rtmp_app: String,
    pub ffmpeg_path: PathBuf,
    pub hls_time: u32,
    pub hls_list_size: u32,
    pub dash_window_size: u32,
    pub dash_extra_window_size: u32,
    pub live_packaging: bool,
}

impl MediaConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("MEDIA_HTTP_ADDR", "0.0.0.0:8000");
        let _parsed = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid MEDIA_HTTP_ADDR: {}", err))?;

        Ok(Self {
            http_addr,
            media_root: PathBuf::from(env_or("MEDIA_ROOT", "./media")),
            rtmp_host: env_or("RTMP_HOST", "localhost"),
            rtmp_port: env_or_parse("RTMP_PORT", "1935")?,
            rtmp_app: env_or("RTMP_APP", "live").trim_matches('/').to_string(),
            ffmpeg_path: PathBuf::from(env_or("FFMPEG_PATH", "/usr/bin/ffmpeg")),
            hls_time: env_or_parse("HLS_TIME", "2")?,
            hls_list_size: env_or_parse("HLS_LIST_SIZE", "3")?,
            dash_window_size: env_or_parse("DASH_WINDOW_SIZE", "3")?,
            dash_extra_window_size: env_or_parse("DASH_EXTRA_WINDOW_SIZE", "5")?,
            live_packaging: env_or_parse("LIVE_PACKAGING", "true")?,
        })
    }

    /// RTMP address an encoder reads a published stream back from.
    pub fn ingest_url(&self, stream_key: &str) -> String {
        format!(
            "rtmp://{}:{}/{}/{}",
            self.rtmp_host, self.rtmp_port, self.rtmp_app, stream_key
        )
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.media_root.join("recordings")
    }

    /// Directory holding the rolling HLS/DASH output of one stream. Keyed by stream id so
    /// playback URLs never carry the publish key.
    pub fn live_dir(&self, stream_id: Uuid) -> PathBuf {
        self.media_root
            .join(&self.rtmp_app)
            .join(stream_id.to_string())
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8000".to_string(),
            media_root: PathBuf::from("./media"),
            rtmp_host: "localhost".to_string(),
            rtmp_port: 1935,
            rtmp_app: "live".to_string(),
            ffmpeg_path: PathBuf::from("/usr/bin/ffmpeg"),
            hls_time: 2,
            hls_list_size: 3,
            dash_window_size: 3,
            dash_extra_window_size: 5,
            live_packaging: true,
        }
    }
}
