mod support;

use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cardcast_common::config::RgbColor;
use cardcast_common::error::CardcastError;
use cardcast_export_engine::{ExportConfig, ExportFormat, ExportSession, ExportState};
use cardcast_webm::{inspect, VideoCodec};

use support::{CountingProvider, ScriptedEncoder};

fn config(fps: u32, duration_ms: u64) -> ExportConfig {
    ExportConfig {
        fps,
        duration_ms,
        bitrate: 1_000_000,
        background: None,
        ..ExportConfig::default()
    }
}

#[tokio::test]
async fn test_one_second_at_ten_fps_produces_playable_webm() {
    let provider = CountingProvider::new(300, 500);
    let surfaces = provider.stats();
    let encoder = ScriptedEncoder::vp9_and_vp8();
    let encoder_stats = encoder.stats();

    let mut session = ExportSession::new(config(10, 1000), Box::new(provider), Box::new(encoder));
    let artifact = session.run().await.expect("export should succeed");

    assert_eq!(artifact.mime_type, "video/webm");
    assert!(artifact.len() > 10 * 1024, "artifact only {} bytes", artifact.len());
    assert_eq!(artifact.codec, Some(VideoCodec::Vp9));
    assert_eq!(artifact.frame_count, 10);
    assert_eq!((artifact.width, artifact.height), (300, 500));

    let summary = inspect(&artifact.bytes).expect("artifact should parse");
    assert_eq!(summary.track_count, 1);
    assert_eq!(summary.codec_id.as_deref(), Some("V_VP9"));
    assert_eq!((summary.width, summary.height), (Some(300), Some(500)));
    assert_eq!(summary.blocks.len(), 10);
    assert!(summary.blocks[0].key_frame);
    assert!(summary.timecodes_non_decreasing());
    let duration = summary.duration.expect("duration should be written");
    assert!((duration - 1.0).abs() <= 0.1, "duration was {duration}s");

    assert_eq!(session.state(), ExportState::Done);
    assert_eq!(encoder_stats.closes(), 1);
    assert_eq!(surfaces.live(), 0);
    assert_eq!(surfaces.releases(), 1);
    assert_eq!(session.live_buffers(), 0);
}

#[tokio::test]
async fn test_falls_back_to_vp8_when_vp9_is_unsupported() {
    let encoder = ScriptedEncoder::new(&[VideoCodec::Vp8]);
    let stats = encoder.stats();
    let mut session = ExportSession::new(
        config(10, 300),
        Box::new(CountingProvider::new(64, 96)),
        Box::new(encoder),
    );
    let artifact = session.run().await.unwrap();

    assert_eq!(artifact.codec, Some(VideoCodec::Vp8));
    assert_eq!(stats.configured_codec(), Some(VideoCodec::Vp8));
    let summary = inspect(&artifact.bytes).unwrap();
    assert_eq!(summary.codec_id.as_deref(), Some("V_VP8"));
}

#[tokio::test]
async fn test_negotiation_failure_captures_nothing() {
    let provider = CountingProvider::new(300, 500);
    let surfaces = provider.stats();
    let encoder = ScriptedEncoder::new(&[]);
    let encoder_stats = encoder.stats();

    let mut session = ExportSession::new(config(10, 1000), Box::new(provider), Box::new(encoder));
    let err = session.run().await.unwrap_err();

    assert!(matches!(err, CardcastError::Configuration { .. }), "got {err:?}");
    assert_eq!(session.frames_captured(), 0);
    assert_eq!(surfaces.snapshots(), 0);
    assert_eq!(session.state(), ExportState::Failed);
    assert_eq!(encoder_stats.closes(), 1);
    assert_eq!(surfaces.live(), 0);
}

#[tokio::test]
async fn test_capture_failure_releases_everything() {
    let provider = CountingProvider::new(120, 160).failing_snapshot(3);
    let surfaces = provider.stats();
    let encoder = ScriptedEncoder::vp9_and_vp8();
    let encoder_stats = encoder.stats();

    let mut session = ExportSession::new(config(20, 500), Box::new(provider), Box::new(encoder));
    let err = session.run().await.unwrap_err();

    assert_eq!(err.kind(), "capture");
    assert_eq!(session.frames_captured(), 3);
    assert_eq!(session.state(), ExportState::Failed);
    assert_eq!(encoder_stats.closes(), 1);
    assert_eq!(surfaces.live(), 0);
    assert_eq!(session.live_buffers(), 0);
    assert!(session.encoder_closed());
}

#[tokio::test]
async fn test_encoder_fault_is_fatal() {
    let encoder = ScriptedEncoder::vp9_and_vp8().failing_on_frame(2);
    let encoder_stats = encoder.stats();
    let provider = CountingProvider::new(64, 64);
    let surfaces = provider.stats();

    let mut session = ExportSession::new(config(20, 500), Box::new(provider), Box::new(encoder));
    let err = session.run().await.unwrap_err();

    assert_eq!(err.kind(), "encode");
    assert_eq!(encoder_stats.frames(), 2);
    assert_eq!(encoder_stats.closes(), 1);
    assert_eq!(surfaces.live(), 0);
}

#[tokio::test]
async fn test_missing_or_empty_region() {
    let mut missing = ExportSession::new(
        config(10, 200),
        Box::new(CountingProvider::new(64, 64).with_bounds(None)),
        Box::new(ScriptedEncoder::vp9_and_vp8()),
    );
    assert_eq!(missing.run().await.unwrap_err().kind(), "capture");

    let provider = CountingProvider::new(64, 64).with_bounds(Some((0, 64)));
    let surfaces = provider.stats();
    let mut empty = ExportSession::new(
        config(10, 200),
        Box::new(provider),
        Box::new(ScriptedEncoder::vp9_and_vp8()),
    );
    assert_eq!(empty.run().await.unwrap_err().kind(), "configuration");
    assert_eq!(surfaces.live(), 0);
}

#[tokio::test]
async fn test_stop_flag_cancels_between_frames() {
    let encoder = ScriptedEncoder::vp9_and_vp8();
    let encoder_stats = encoder.stats();
    let provider = CountingProvider::new(64, 64);
    let surfaces = provider.stats();

    let session = ExportSession::new(config(10, 1000), Box::new(provider), Box::new(encoder));
    let stop = session.stop_flag();
    let mut session = session.with_progress(Box::new(move |progress| {
        if progress.frames_captured == 2 {
            stop.store(true, Ordering::SeqCst);
        }
    }));

    let err = session.run().await.unwrap_err();
    assert!(
        matches!(err, CardcastError::Cancelled { frames_captured: 2 }),
        "got {err:?}"
    );
    assert_eq!(err.kind(), "cancelled");
    assert_eq!(encoder_stats.closes(), 1);
    assert_eq!(surfaces.live(), 0);
}

#[tokio::test]
async fn test_progress_messages_and_panicking_sink() {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink_messages = messages.clone();
    let mut session = ExportSession::new(
        config(10, 500),
        Box::new(CountingProvider::new(64, 64)),
        Box::new(ScriptedEncoder::vp9_and_vp8()),
    )
    .with_progress(Box::new(move |progress| {
        sink_messages.lock().unwrap().push(progress.message.clone());
        if progress.frames_captured == 3 {
            panic!("sink bug");
        }
    }));

    let artifact = session.run().await.expect("a panicking sink must not fail the export");
    assert_eq!(artifact.frame_count, 5);

    let messages = messages.lock().unwrap().clone();
    assert_eq!(
        messages,
        vec![
            "Encoding frame 1/5",
            "Encoding frame 2/5",
            "Encoding frame 3/5",
            "Encoding frame 4/5",
            "Encoding frame 5/5",
            "Muxing",
            "Done",
        ]
    );
}

#[tokio::test]
async fn test_session_runs_once() {
    let mut session = ExportSession::new(
        config(10, 100),
        Box::new(CountingProvider::new(32, 32)),
        Box::new(ScriptedEncoder::vp9_and_vp8()),
    );
    session.run().await.unwrap();
    let err = session.run().await.unwrap_err();
    assert_eq!(err.kind(), "configuration");
    assert_eq!(session.state(), ExportState::Done);
}

#[tokio::test]
async fn test_keyframe_once_per_second() {
    let encoder = ScriptedEncoder::vp9_and_vp8();
    let stats = encoder.stats();
    let mut session = ExportSession::new(
        config(10, 2000),
        Box::new(CountingProvider::new(32, 32)),
        Box::new(encoder),
    );
    let artifact = session.run().await.unwrap();

    assert_eq!(stats.key_requests(), vec![0, 10]);
    let summary = inspect(&artifact.bytes).unwrap();
    assert_eq!(summary.blocks.len(), 20);
    assert_eq!(summary.key_frame_count(), 2);
    assert!(summary.blocks[10].key_frame);
}

#[tokio::test]
async fn test_chunks_held_by_encoder_arrive_after_flush() {
    let encoder = ScriptedEncoder::vp9_and_vp8().with_hold_back(4);
    let mut session = ExportSession::new(
        config(20, 300),
        Box::new(CountingProvider::new(48, 48)),
        Box::new(encoder),
    );
    let artifact = session.run().await.unwrap();

    let summary = inspect(&artifact.bytes).unwrap();
    assert_eq!(summary.blocks.len(), 6);
    let timecodes: Vec<i64> = summary.blocks.iter().map(|b| b.timecode).collect();
    assert_eq!(timecodes, vec![0, 50, 100, 150, 200, 250]);
}

#[tokio::test]
async fn test_background_fills_transparent_margin() {
    // Surface background by default.
    let encoder = ScriptedEncoder::vp9_and_vp8();
    let stats = encoder.stats();
    let mut session = ExportSession::new(
        config(10, 100),
        Box::new(CountingProvider::new(48, 48)),
        Box::new(encoder),
    );
    session.run().await.unwrap();
    assert_eq!(stats.corner_pixels(), vec![[0xfa, 0xf0, 0xe6]]);

    // Explicit override wins.
    let encoder = ScriptedEncoder::vp9_and_vp8();
    let stats = encoder.stats();
    let mut session = ExportSession::new(
        ExportConfig {
            background: Some(RgbColor([0, 0, 255])),
            ..config(10, 100)
        },
        Box::new(CountingProvider::new(48, 48)),
        Box::new(encoder),
    );
    session.run().await.unwrap();
    assert_eq!(stats.corner_pixels(), vec![[0, 0, 255]]);
}

#[tokio::test]
async fn test_frames_are_captured_no_earlier_than_their_deadline() {
    let provider = CountingProvider::new(48, 48);
    let surfaces = provider.stats();
    let mut session = ExportSession::new(
        config(10, 1000),
        Box::new(provider),
        Box::new(ScriptedEncoder::vp9_and_vp8()),
    );

    let before = Instant::now();
    session.run().await.unwrap();
    let elapsed = before.elapsed();

    // The capture epoch is taken after `before`, so each snapshot offset from
    // `before` is at least its offset from the epoch.
    let times = surfaces.snapshot_times();
    assert_eq!(times.len(), 10);
    for (index, taken) in times.iter().enumerate() {
        let deadline = Duration::from_millis(100 * index as u64);
        let offset = taken.duration_since(before);
        assert!(offset >= deadline, "frame {index} taken at {offset:?}, due {deadline:?}");
    }
    assert!(elapsed >= Duration::from_millis(900), "run took {elapsed:?}");
}

#[tokio::test]
async fn test_gif_export_writes_timed_animation() {
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;

    let provider = CountingProvider::new(60, 40);
    let surfaces = provider.stats();
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink_messages = messages.clone();
    let mut session = ExportSession::gif(config(10, 500), Box::new(provider)).with_progress(
        Box::new(move |progress| sink_messages.lock().unwrap().push(progress.message.clone())),
    );
    assert_eq!(session.format(), ExportFormat::Gif);

    let artifact = session.run().await.expect("gif export should succeed");
    assert_eq!(artifact.format, ExportFormat::Gif);
    assert_eq!(artifact.mime_type, "image/gif");
    assert_eq!(artifact.codec, None);
    assert_eq!(artifact.frame_count, 5);
    assert_eq!(artifact.duration, Duration::from_millis(500));
    assert_eq!((artifact.width, artifact.height), (60, 40));

    let frames = GifDecoder::new(Cursor::new(artifact.bytes))
        .unwrap()
        .into_frames()
        .collect_frames()
        .unwrap();
    assert_eq!(frames.len(), 5);
    for frame in &frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        assert_eq!(numer / denom, 100);
        assert_eq!(frame.buffer().dimensions(), (60, 40));
    }

    assert_eq!(
        messages.lock().unwrap().last().map(String::as_str),
        Some("Done")
    );
    assert!(messages
        .lock()
        .unwrap()
        .iter()
        .any(|m| m == "Rendering frame 5/5"));
    assert!(messages.lock().unwrap().iter().any(|m| m == "Encoding GIF"));
    assert_eq!(session.state(), ExportState::Done);
    assert!(session.encoder_closed());
    assert_eq!(surfaces.live(), 0);
    assert_eq!(session.live_buffers(), 0);
}

#[tokio::test]
async fn test_gif_capture_failure_releases_surface() {
    let provider = CountingProvider::new(32, 32).failing_snapshot(1);
    let surfaces = provider.stats();
    let mut session = ExportSession::gif(config(10, 500), Box::new(provider));

    let err = session.run().await.unwrap_err();
    assert_eq!(err.kind(), "capture");
    assert_eq!(session.frames_captured(), 1);
    assert_eq!(session.state(), ExportState::Failed);
    assert_eq!(surfaces.live(), 0);
    assert_eq!(session.live_buffers(), 0);
}
