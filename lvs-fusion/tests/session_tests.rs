//! Session-level behaviour: windowing, gating, fusion and persistence

mod common;

use common::{blink_chunk, frame, frame_message, Harness, Pixel, PixelModels};
use lvs_common::Tunables;
use lvs_fusion::db::get_verification;
use lvs_fusion::liveness::Challenge;
use lvs_fusion::session::{Session, SessionKey};
use std::time::Duration;

fn key(meeting_code: &str, subject_id: i64) -> SessionKey {
    SessionKey {
        meeting_code: meeting_code.to_string(),
        subject_id,
    }
}

async fn start(harness: &Harness, meeting_code: &str, subject_id: i64) -> Session {
    Session::start(
        harness.engine.clone(),
        key(meeting_code, subject_id),
        Challenge::Blink,
        None,
    )
    .await
}

#[tokio::test]
async fn test_clean_session_passes() {
    let harness = Harness::new(PixelModels::default()).await;
    harness.add_document(7, 0).await;
    let mut session = start(&harness, "meet-1", 7).await;
    assert!(session.reference().is_ready());

    for _ in 0..3 {
        for pixel in blink_chunk(60, 0.1, 0.1) {
            assert!(session.handle_text(&frame_message(pixel)).await.is_some());
        }
    }
    assert_eq!(session.state().accumulator().chunks(), 3);

    let verdict = session.finalize().await.expect("frames were decoded");
    assert!(verdict.is_pass());
    assert!(verdict.reasons.is_empty());
    assert_eq!(verdict.scores.liveness, 1.0);
    assert!((verdict.scores.deepfake - 0.02).abs() < 1e-9);
    assert!((verdict.scores.face_match - 0.1).abs() < 1e-9);

    let record = get_verification(&harness.pool, "meet-1", 7)
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_pass);
    assert_eq!(record.failure_reason.as_deref(), Some("NA"));
    assert_eq!(harness.row_count().await, 1);
}

#[tokio::test]
async fn test_one_fake_chunk_fails_session() {
    let harness = Harness::new(PixelModels::default()).await;
    harness.add_document(7, 0).await;
    let mut session = start(&harness, "meet-1", 7).await;

    for fake in [0.1, 0.95, 0.1] {
        for pixel in blink_chunk(60, fake, 0.1) {
            session.handle_text(&frame_message(pixel)).await;
        }
    }

    let verdict = session.finalize().await.unwrap();
    assert!(!verdict.is_pass());
    // Session mean stays low; the flagged chunk still rejects
    assert!(verdict.scores.deepfake < 0.5);
    assert!(verdict.failure_reason().contains("Deepfake Detected"));
    assert!(verdict.failure_reason().contains("0.95"));

    let record = get_verification(&harness.pool, "meet-1", 7)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.is_pass);
}

#[tokio::test]
async fn test_missing_reference_is_always_worst_distance() {
    let harness = Harness::new(PixelModels::default()).await;
    // No identity document for subject 9
    let mut session = start(&harness, "meet-2", 9).await;
    assert!(!session.reference().is_ready());

    for _ in 0..3 {
        let mut last = None;
        for pixel in blink_chunk(60, 0.1, 0.0) {
            last = Some(session.ingest_frame(frame(pixel)).await);
        }
        let update = last.unwrap();
        assert_eq!(update.face_match.distance, 1.0);
        assert!(!update.face_match.is_match);
    }

    let verdict = session.finalize().await.unwrap();
    assert_eq!(verdict.scores.face_match, 1.0);
    assert_eq!(verdict.failure_reason(), "Face Mismatch (1.00)");
}

#[tokio::test]
async fn test_unextractable_reference_is_permanent() {
    let harness = Harness::new(PixelModels::default()).await;
    harness.add_document(4, 255).await;
    let mut session = start(&harness, "meet-3", 4).await;
    assert!(!session.reference().is_ready());

    for pixel in blink_chunk(60, 0.1, 0.05) {
        session.ingest_frame(frame(pixel)).await;
    }
    assert_eq!(session.state().snapshot().face_match.distance, 1.0);
    session.finalize().await;
}

#[tokio::test]
async fn test_confirmation_survives_later_chunks() {
    let harness = Harness::new(PixelModels::default()).await;
    harness.add_document(1, 0).await;
    let mut session = start(&harness, "meet-4", 1).await;

    for pixel in blink_chunk(60, 0.1, 0.1) {
        session.ingest_frame(frame(pixel)).await;
    }
    assert!(session.state().confirmed());

    // No blink and no face at all afterwards
    let mut last = None;
    for _ in 0..120 {
        let pixel = Pixel {
            ear: 0.0,
            fake: 0.1,
            distance: 0.1,
        };
        last = Some(session.ingest_frame(frame(pixel)).await);
    }
    let update = last.unwrap();
    assert!(update.liveness.confirmed);
    assert_eq!(update.liveness.score, 1.0);
    session.finalize().await;
}

#[tokio::test]
async fn test_instant_score_is_running_max() {
    let harness = Harness::new(PixelModels::default()).await;
    let mut session = start(&harness, "meet-5", 2).await;

    let closed = Pixel {
        ear: 0.10,
        ..Pixel::clean()
    };
    let update = session.ingest_frame(frame(closed)).await;
    assert!((update.liveness.score - 0.9).abs() < 1e-9);

    let update = session.ingest_frame(frame(Pixel::clean())).await;
    assert!((update.liveness.score - 0.9).abs() < 1e-9);
    assert!(!update.liveness.confirmed);
    session.finalize().await;
}

#[tokio::test]
async fn test_unrecognized_messages_dropped() {
    let harness = Harness::new(PixelModels::default()).await;
    let mut session = start(&harness, "meet-6", 3).await;

    assert!(session.handle_text("not json").await.is_none());
    assert!(session.handle_text(r#"{"type":"ping"}"#).await.is_none());
    assert!(session
        .handle_text(r#"{"type":"frame","image":"data:image/png;base64,AAAA"}"#)
        .await
        .is_none());
    assert_eq!(session.state().frames_decoded(), 0);

    // Observer-only session persists nothing
    assert!(session.finalize().await.is_none());
    assert!(session.finalize().await.is_none());
    assert_eq!(harness.row_count().await, 0);
}

#[tokio::test]
async fn test_busy_gate_defers_then_drops_window() {
    let harness = Harness::new(PixelModels::default()).await;
    let mut session = start(&harness, "meet-7", 5).await;

    let held = harness.engine.gate.try_enter().unwrap();
    for _ in 0..120 {
        session.ingest_frame(frame(Pixel::clean())).await;
    }
    assert_eq!(session.state().accumulator().chunks(), 0);
    assert_eq!(harness.models.classified(), 0);

    // Frame 121 pushes the waiting window past 2C
    session.ingest_frame(frame(Pixel::clean())).await;
    drop(held);

    for _ in 0..59 {
        session.ingest_frame(frame(Pixel::clean())).await;
    }
    assert_eq!(session.state().accumulator().chunks(), 0);
    session.ingest_frame(frame(Pixel::clean())).await;
    assert_eq!(session.state().accumulator().chunks(), 1);
    assert_eq!(harness.models.classified(), 60);
    session.finalize().await;
}

#[tokio::test]
async fn test_retained_window_handed_off_whole() {
    let harness = Harness::new(PixelModels::default()).await;
    let mut session = start(&harness, "meet-8", 6).await;

    let held = harness.engine.gate.try_enter().unwrap();
    for _ in 0..70 {
        session.ingest_frame(frame(Pixel::clean())).await;
    }
    drop(held);

    session.ingest_frame(frame(Pixel::clean())).await;
    assert_eq!(session.state().accumulator().chunks(), 1);
    assert_eq!(harness.models.classified(), 71);
    session.finalize().await;
}

#[tokio::test]
async fn test_live_record_written_after_each_pass() {
    let harness = Harness::new(PixelModels::default()).await;
    harness.add_document(8, 0).await;
    let mut session = start(&harness, "meet-9", 8).await;

    for pixel in blink_chunk(60, 0.1, 0.3) {
        session.ingest_frame(frame(pixel)).await;
    }
    let live = get_verification(&harness.pool, "meet-9", 8)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.face_match_score, Some(0.3));
    assert!(live.is_pass);

    for pixel in blink_chunk(60, 0.1, 0.7) {
        session.ingest_frame(frame(pixel)).await;
    }
    let live = get_verification(&harness.pool, "meet-9", 8)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.face_match_score, Some(0.7));
    assert_eq!(live.failure_reason.as_deref(), Some("Face Mismatch (0.70)"));

    // Finalize overwrites with the session mean
    session.finalize().await;
    let last = get_verification(&harness.pool, "meet-9", 8)
        .await
        .unwrap()
        .unwrap();
    assert!((last.face_match_score.unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(last.id, live.id);
    assert_eq!(harness.row_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_finalize_single_record() {
    let harness = Harness::new(PixelModels::default()).await;
    let mut first = start(&harness, "meet-10", 11).await;
    let mut second = start(&harness, "meet-10", 11).await;

    // Below one chunk: nothing persisted before finalize
    for _ in 0..10 {
        first.ingest_frame(frame(Pixel::clean())).await;
        second.ingest_frame(frame(Pixel::clean())).await;
    }
    assert_eq!(harness.row_count().await, 0);

    let (a, b) = tokio::join!(first.finalize(), second.finalize());
    assert!(a.is_some());
    assert!(b.is_some());
    assert_eq!(harness.row_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_heavy_pipeline_mutually_exclusive() {
    let harness = Harness::new(PixelModels::slow(Duration::from_millis(1))).await;
    let tunables = Tunables::default();

    let mut tasks = Vec::new();
    for subject_id in 0..4 {
        let engine = harness.engine.clone();
        let chunk_size = tunables.chunk_size;
        tasks.push(tokio::spawn(async move {
            let mut session = Session::start(
                engine,
                key("busy-meeting", subject_id),
                Challenge::Blink,
                None,
            )
            .await;
            for _ in 0..chunk_size * 3 {
                session.ingest_frame(frame(Pixel::clean())).await;
            }
            let chunks = session.state().accumulator().chunks();
            session.finalize().await;
            chunks
        }));
    }

    let mut processed = 0;
    for task in tasks {
        processed += task.await.unwrap();
    }

    assert!(processed >= 1);
    assert_eq!(harness.models.max_in_flight(), 1);
    assert_eq!(harness.row_count().await, 4);
}

#[tokio::test]
async fn test_sessions_of_a_meeting_see_each_other() {
    let harness = Harness::new(PixelModels::default()).await;
    let mut sender = start(&harness, "shared", 1).await;
    let mut viewer = start(&harness, "shared", 2).await;
    let mut viewer_rx = viewer.subscribe().unwrap();

    let closed = Pixel {
        ear: 0.10,
        ..Pixel::clean()
    };
    sender.ingest_frame(frame(closed)).await;
    let seen = viewer_rx.recv().await.unwrap();
    assert!((seen.liveness.score - 0.9).abs() < 1e-9);

    drop(viewer_rx);
    viewer.finalize().await;
    sender.finalize().await;
    assert_eq!(harness.engine.registry.meeting_count().await, 0);
}

#[tokio::test]
async fn test_persistence_failure_does_not_stop_session() {
    let harness = Harness::new(PixelModels::default()).await;
    harness.add_document(12, 0).await;
    let mut session = start(&harness, "meet-11", 12).await;

    for pixel in blink_chunk(60, 0.1, 0.2) {
        session.ingest_frame(frame(pixel)).await;
    }
    assert_eq!(harness.row_count().await, 1);

    sqlx::query("DROP TABLE verification_results")
        .execute(&harness.pool)
        .await
        .unwrap();

    let mut observer = session.subscribe().unwrap();
    for pixel in blink_chunk(60, 0.1, 0.2) {
        let update = session.ingest_frame(frame(pixel)).await;
        let seen = observer.recv().await.unwrap();
        assert_eq!(seen.face_match.distance, update.face_match.distance);
    }
    assert_eq!(session.state().accumulator().chunks(), 2);

    drop(observer);
    let verdict = session.finalize().await.expect("verdict despite failed writes");
    assert!(verdict.is_pass());
    assert!((verdict.scores.face_match - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_document_outside_uploads_is_not_read() {
    let harness = Harness::new(PixelModels::default()).await;

    // A readable image outside the uploads folder
    let outside = harness.dir.path().join("private").join("13.png");
    std::fs::create_dir_all(outside.parent().unwrap()).unwrap();
    image::RgbImage::from_pixel(16, 12, image::Rgb([60, 0, 0]))
        .save(&outside)
        .unwrap();
    harness
        .add_document_row(13, outside.to_str().unwrap())
        .await;
    let mut escaping = start(&harness, "meet-12", 13).await;
    assert!(!escaping.reference().is_ready());
    escaping.finalize().await;

    harness.add_document_row(14, "../private/13.png").await;
    let mut relative = start(&harness, "meet-12", 14).await;
    assert!(!relative.reference().is_ready());
    relative.finalize().await;

    // Same file name inside uploads is used
    harness.add_document(15, 0).await;
    harness
        .add_document_row(16, "https://files.example.com/uploads/15.png")
        .await;
    let mut by_url = start(&harness, "meet-12", 16).await;
    assert!(by_url.reference().is_ready());
    by_url.finalize().await;
}

#[tokio::test]
async fn test_turn_challenge_without_pose_reports_unavailable() {
    let harness = Harness::without_head_pose(PixelModels::default()).await;

    let mut turning = Session::start(
        harness.engine.clone(),
        key("meet-13", 1),
        Challenge::TurnLeft,
        None,
    )
    .await;
    let update = turning.ingest_frame(frame(Pixel::clean())).await;
    assert!(!update.liveness.available);
    assert!(update.deepfake.available);
    assert!(update.face_match.available);
    turning.finalize().await;

    let mut blinking = start(&harness, "meet-13", 2).await;
    let update = blinking.ingest_frame(frame(Pixel::clean())).await;
    assert!(update.liveness.available);
    blinking.finalize().await;
}
