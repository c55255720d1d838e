use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MediaConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Recording,
    Hls,
    Dash,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Hls => "hls",
            Self::Dash => "dash",
        }
    }
}

struct RunningProcess {
    generation: u64,
    /// Taken once the process has been told to stop.
    stop: Option<oneshot::Sender<()>>,
}

impl RunningProcess {
    fn is_stopping(&self) -> bool {
        self.stop.is_none()
    }

    fn signal_stop(&mut self) -> bool {
        match self.stop.take() {
            Some(stop) => {
                let _ = stop.send(());
                true
            }
            None => false,
        }
    }
}

type Registry = HashMap<(Uuid, ProcessKind), RunningProcess>;

/// Encoder processes attached to live streams, keyed by stream id.
///
/// Every entry owns the stop channel of a supervising task. Signalling (or
/// dropping) that channel kills the child. An entry stays registered until its
/// supervisor has seen the child terminate; a stopping entry no longer counts as
/// running and may be replaced by a fresh process of the same kind.
#[derive(Clone)]
pub struct MediaProcesses {
    config: Arc<MediaConfig>,
    running: Arc<Mutex<Registry>>,
    generation: Arc<AtomicU64>,
}

impl MediaProcesses {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config: Arc::new(config),
            running: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts the recording (and live packaging, when enabled) of a freshly published stream.
    ///
    /// Failures are logged and swallowed; a publish is never refused because an encoder
    /// could not be started.
    pub async fn start_for(&self, stream_id: Uuid, stream_key: &str) {
        let input = self.config.ingest_url(stream_key);

        let recordings = self.config.recordings_dir();
        let output = recordings.join(recording_file_name(stream_id, OffsetDateTime::now_utc()));
        let args = recording_args(&input, &output);
        self.start_logged(stream_id, ProcessKind::Recording, &recordings, args)
            .await;

        if !self.config.live_packaging {
            return;
        }

        let live_dir = self.config.live_dir(stream_id);
        let hls = hls_args(
            &input,
            &live_dir,
            self.config.hls_time,
            self.config.hls_list_size,
        );
        self.start_logged(stream_id, ProcessKind::Hls, &live_dir, hls)
            .await;

        let dash = dash_args(
            &input,
            &live_dir,
            self.config.dash_window_size,
            self.config.dash_extra_window_size,
        );
        self.start_logged(stream_id, ProcessKind::Dash, &live_dir, dash)
            .await;
    }

    async fn start_logged(
        &self,
        stream_id: Uuid,
        kind: ProcessKind,
        output_dir: &Path,
        args: Vec<String>,
    ) {
        if let Err(err) = tokio::fs::create_dir_all(output_dir).await {
            error!(error = ?err, %stream_id, kind = kind.as_str(), "failed to create media output directory");
            return;
        }
        match self.spawn(stream_id, kind, args) {
            Ok(true) => info!(%stream_id, kind = kind.as_str(), "media process started"),
            Ok(false) => info!(%stream_id, kind = kind.as_str(), "media process already running"),
            Err(err) => error!(error = ?err, %stream_id, kind = kind.as_str(), "failed to start media process"),
        }
    }

    /// Spawns the encoder with `args` unless one of this kind already runs for the stream.
    pub fn spawn(&self, stream_id: Uuid, kind: ProcessKind, args: Vec<String>) -> Result<bool> {
        let mut running = self.lock();
        if running
            .get(&(stream_id, kind))
            .is_some_and(|entry| !entry.is_stopping())
        {
            return Ok(false);
        }

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                anyhow!(
                    "failed to spawn {}: {}",
                    self.config.ffmpeg_path.display(),
                    err
                )
            })?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (stop, stop_rx) = oneshot::channel();
        running.insert(
            (stream_id, kind),
            RunningProcess {
                generation,
                stop: Some(stop),
            },
        );
        drop(running);

        let registry = self.running.clone();
        tokio::spawn(async move {
            let stopped = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) if status.success() => {
                            info!(%stream_id, kind = kind.as_str(), "media process finished");
                        }
                        Ok(status) => {
                            warn!(%stream_id, kind = kind.as_str(), %status, "media process exited with failure");
                        }
                        Err(err) => {
                            error!(error = ?err, %stream_id, kind = kind.as_str(), "failed to wait on media process");
                        }
                    }
                    false
                }
                _ = stop_rx => true,
            };

            if stopped {
                if let Err(err) = child.kill().await {
                    warn!(error = ?err, %stream_id, kind = kind.as_str(), "failed to kill media process");
                } else {
                    info!(%stream_id, kind = kind.as_str(), "media process stopped");
                }
            }

            let mut running = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if running
                .get(&(stream_id, kind))
                .is_some_and(|entry| entry.generation == generation)
            {
                running.remove(&(stream_id, kind));
            }
        });

        Ok(true)
    }

    /// Signals every process of a stream to stop. Returns how many were signalled.
    pub fn stop(&self, stream_id: Uuid) -> usize {
        let mut signalled = 0;
        for ((id, _), entry) in self.lock().iter_mut() {
            if *id == stream_id && entry.signal_stop() {
                signalled += 1;
            }
        }
        signalled
    }

    pub fn stop_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.lock().values_mut() {
            if entry.signal_stop() {
                signalled += 1;
            }
        }
        signalled
    }

    /// Waits until every registered process has terminated. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// True while a process of `kind` runs for the stream and has not been told to stop.
    pub fn is_running(&self, stream_id: Uuid, kind: ProcessKind) -> bool {
        self.lock()
            .get(&(stream_id, kind))
            .is_some_and(|entry| !entry.is_stopping())
    }

    /// Registered processes, including those still shutting down.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn recording_file_name(stream_id: Uuid, at: OffsetDateTime) -> String {
    let stamp = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("{}_{}.mp4", stream_id, stamp.replace(':', "-"))
}

fn base_args(input: &str) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-c".into(),
        "copy".into(),
    ]
}

// Fragmented MP4 stays playable when the recorder is killed mid-stream.
pub fn recording_args(input: &str, output: &Path) -> Vec<String> {
    let mut args = base_args(input);
    args.extend([
        "-movflags".into(),
        "+frag_keyframe+empty_moov".into(),
        "-y".into(),
        path_arg(output),
    ]);
    args
}

pub fn hls_args(input: &str, dir: &Path, hls_time: u32, list_size: u32) -> Vec<String> {
    let mut args = base_args(input);
    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        hls_time.to_string(),
        "-hls_list_size".into(),
        list_size.to_string(),
        "-hls_flags".into(),
        "delete_segments".into(),
        "-y".into(),
        path_arg(&dir.join("index.m3u8")),
    ]);
    args
}

pub fn dash_args(input: &str, dir: &Path, window_size: u32, extra_window_size: u32) -> Vec<String> {
    let mut args = base_args(input);
    args.extend([
        "-f".into(),
        "dash".into(),
        "-window_size".into(),
        window_size.to_string(),
        "-extra_window_size".into(),
        extra_window_size.to_string(),
        "-y".into(),
        path_arg(&dir.join("index.mpd")),
    ]);
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
