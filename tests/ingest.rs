//! Media Server Hook Tests
//!
//! Covers publish/unpublish hooks and the end-to-end broadcast scenario.

mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use assembly_portal::app::ingest::{
    IngestBridge, IngestEvent, IngestHooks, PublishDecision, UnpublishOutcome,
};
use assembly_portal::config::MediaConfig;
use assembly_portal::infra::media::{MediaProcesses, ProcessKind};
use axum::http::StatusCode;
use common::app;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

async fn stream_row(app: &common::TestApp, id: Uuid) -> (bool, OffsetDateTime, Option<OffsetDateTime>) {
    sqlx::query_as("SELECT is_live, start_time, end_time FROM streams WHERE id = $1")
        .bind(id)
        .fetch_one(app.pool())
        .await
        .expect("stream row")
}

fn stream_id(stream: &Value) -> Uuid {
    Uuid::parse_str(stream["id"].as_str().unwrap()).unwrap()
}

fn event_for(stream: &Value) -> IngestEvent {
    IngestEvent {
        session_id: Uuid::new_v4().to_string(),
        path: format!("/live/{}", stream["streamKey"].as_str().unwrap()),
        args: Value::Null,
    }
}

/// A stand-in encoder that ignores its ffmpeg arguments and idles until killed.
#[cfg(unix)]
fn idle_encoder(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn publish_with_unknown_key_is_rejected_without_writes() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("unknown_key").await;
    let stream = app.create_stream(&admin, "Untouched").await;
    let before = stream_row(&app, stream_id(&stream)).await;

    let resp = app
        .ingest("publish", &format!("/live/{}", Uuid::new_v4().simple()))
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(stream_row(&app, stream_id(&stream)).await, before);
}

#[tokio::test]
async fn publish_without_key_segment_is_rejected() {
    let Some(app) = app().await else { return };

    let resp = app.ingest("publish", "/live").await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn publish_with_known_key_goes_live() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("publish").await;
    let stream = app.create_stream(&admin, "Published").await;
    let key = stream["streamKey"].as_str().unwrap();

    let resp = app.ingest("publish", &format!("/live/{}", key)).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["streamId"], stream["id"]);
    assert_eq!(resp.data()["wentLive"], true);
    let (is_live, _, _) = stream_row(&app, stream_id(&stream)).await;
    assert!(is_live);
}

#[tokio::test]
async fn repeated_publish_is_accepted_without_second_transition() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("republish").await;
    let stream = app.create_stream(&admin, "Reconnect").await;
    let path = format!("/live/{}", stream["streamKey"].as_str().unwrap());

    let first = app.ingest("publish", &path).await;
    assert_eq!(first.data()["wentLive"], true);
    let (_, started_at, _) = stream_row(&app, stream_id(&stream)).await;

    let second = app.ingest("publish", &path).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.data()["wentLive"], false);

    let (is_live, start_time, _) = stream_row(&app, stream_id(&stream)).await;
    assert!(is_live);
    assert_eq!(start_time, started_at);
}

#[tokio::test]
async fn concurrent_publishes_transition_once() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("race").await;
    let stream = app.create_stream(&admin, "Race").await;
    let path = format!("/live/{}", stream["streamKey"].as_str().unwrap());

    let (a, b) = tokio::join!(app.ingest("publish", &path), app.ingest("publish", &path));

    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(b.status, StatusCode::OK);
    let winners = [a.data()["wentLive"].clone(), b.data()["wentLive"].clone()]
        .iter()
        .filter(|went_live| **went_live == Value::Bool(true))
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn unpublish_with_unknown_key_is_a_no_op() {
    let Some(app) = app().await else { return };

    let resp = app
        .ingest("unpublish", &format!("/live/{}", Uuid::new_v4().simple()))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.data()["streamId"].is_null());
    assert_eq!(resp.data()["ended"], false);
}

#[tokio::test]
async fn unpublish_of_idle_stream_reports_not_ended() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("idle_unpublish").await;
    let stream = app.create_stream(&admin, "Idle").await;

    let resp = app
        .ingest(
            "unpublish",
            &format!("/live/{}", stream["streamKey"].as_str().unwrap()),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["ended"], false);
    let (_, _, end_time) = stream_row(&app, stream_id(&stream)).await;
    assert!(end_time.is_none());
}

#[tokio::test]
async fn broadcast_end_to_end() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("e2e").await;

    // admin creates Stream A; key K is generated
    let stream = app.create_stream(&admin, "Stream A").await;
    assert_eq!(stream["category"], "committee-meeting");
    let id = stream_id(&stream);
    let key = stream["streamKey"].as_str().unwrap().to_string();
    assert_eq!(key.len(), 32);

    // publish with K: A goes live
    let publish = app.ingest("publish", &format!("/live/{}", key)).await;
    assert_eq!(publish.status, StatusCode::OK);
    let (is_live, _, _) = stream_row(&app, id).await;
    assert!(is_live);

    let live = app.get("/api/streams/live", None).await;
    assert!(live.json()["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|listed| listed["id"] == stream["id"]));

    // unpublish with K: A goes idle with an end time
    let unpublish = app.ingest("unpublish", &format!("/live/{}", key)).await;
    assert_eq!(unpublish.status, StatusCode::OK);
    assert_eq!(unpublish.data()["ended"], true);
    let (is_live, start_time, end_time) = stream_row(&app, id).await;
    assert!(!is_live);
    let end_time = end_time.expect("end time set");
    assert!(end_time >= start_time);

    // encoders for A were signalled to stop
    assert!(!app.state.media.is_running(id, ProcessKind::Recording));

    let live = app.get("/api/streams/live", None).await;
    assert!(!live.json()["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|listed| listed["id"] == stream["id"]));
}

#[cfg(unix)]
#[tokio::test]
async fn publish_starts_recording_and_unpublish_stops_it() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("recording").await;
    let stream = app.create_stream(&admin, "Recorded").await;
    let id = stream_id(&stream);

    let scratch = std::env::temp_dir().join(format!("assembly-portal-rec-{}", Uuid::new_v4()));
    let media = MediaProcesses::new(MediaConfig {
        ffmpeg_path: idle_encoder(&scratch),
        media_root: scratch.join("media"),
        live_packaging: false,
        ..MediaConfig::default()
    });
    let bridge = IngestBridge::new(app.state.db.clone(), media.clone());
    let event = event_for(&stream);

    let decision = bridge.on_publish(&event).await.unwrap();
    assert_eq!(
        decision,
        PublishDecision::Accept {
            stream_id: id,
            went_live: true
        }
    );
    assert!(media.is_running(id, ProcessKind::Recording));
    assert!(!media.is_running(id, ProcessKind::Hls));

    let outcome = bridge.on_unpublish(&event).await.unwrap();
    assert_eq!(outcome, UnpublishOutcome::Ended(id));
    assert!(!media.is_running(id, ProcessKind::Recording));
    assert!(media.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(media.active_count(), 0);
}

#[tokio::test]
async fn publish_is_accepted_when_the_encoder_cannot_start() {
    let Some(app) = app().await else { return };
    let admin = app.create_admin("no_encoder").await;
    let stream = app.create_stream(&admin, "Unrecorded").await;
    let id = stream_id(&stream);

    // the shared state points at a missing encoder binary
    let decision = app.state.ingest.on_publish(&event_for(&stream)).await.unwrap();

    assert_eq!(
        decision,
        PublishDecision::Accept {
            stream_id: id,
            went_live: true
        }
    );
    assert!(!app.state.media.is_running(id, ProcessKind::Recording));
    let (is_live, _, _) = stream_row(&app, id).await;
    assert!(is_live);
}
