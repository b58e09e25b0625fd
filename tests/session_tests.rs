// SPDX-License-Identifier: GPL-3.0-only

//! Session controller scenarios against in-process fakes

mod common;

use camera_recorder::backends::camera::{Facing, FrameSize};
use camera_recorder::errors::{CoreError, ErrorKind};
use camera_recorder::filters::FilterSelector;
use camera_recorder::pipelines::video::RecordingState;
use camera_recorder::RecordOutcome;
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn recording_dir(root: &std::path::Path, key: &str) -> std::path::PathBuf {
    root.join(key)
}

#[test]
fn preview_negotiates_smallest_covering_size() {
    for (display, expected) in [
        ((640, 480), FrameSize::new(640, 480)),
        ((700, 500), FrameSize::new(1280, 720)),
    ] {
        let camera = Arc::new(FakeCameraBackend::new());
        let root = temp_root();
        let (mut session, listener) = session(&camera, test_config(&root));

        session.start_preview(Facing::Back).unwrap();
        assert!(!session.is_previewing(), "preview waits for a display");
        session.attach_display(display.0, display.1).unwrap();

        assert_eq!(session.capture().negotiated().map(|f| f.size), Some(expected));
        assert_eq!(listener.previews(), vec![(expected.width, expected.height)]);
        wait_for_frames(&session);
    }
}

#[test]
fn cancel_leaves_no_residue() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) = session(&camera, test_config(&root));
    session.start_preview(Facing::Back).unwrap();
    session.attach_display(640, 480).unwrap();
    wait_for_frames(&session);

    session.start_record("cancelled").unwrap();
    assert!(recording_dir(&root, "cancelled").exists());
    std::thread::sleep(Duration::from_millis(300));
    session.cancel_record().unwrap();

    assert!(!recording_dir(&root, "cancelled").exists());
    assert_eq!(session.recording_state(), RecordingState::Off);
    assert!(session.is_previewing());
    assert!(listener.errors().is_empty());
}

#[test]
fn short_recording_is_discarded() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) = session(&camera, test_config(&root));
    session.start_preview(Facing::Back).unwrap();
    session.attach_display(640, 480).unwrap();
    wait_for_frames(&session);

    session.start_record("short").unwrap();
    std::thread::sleep(Duration::from_millis(500));
    let outcome = session.stop_record().unwrap();

    assert!(matches!(outcome, RecordOutcome::TooShort { .. }));
    assert!(!recording_dir(&root, "short").exists());
    assert!(session.review_asset().is_none());
    assert!(listener.errors().is_empty());
}

#[test]
fn recording_is_saved_reviewed_and_committed() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) = session(&camera, test_config(&root));
    session.select_filter(FilterSelector::EdgeDetect);
    session.start_preview(Facing::Back).unwrap();
    session.attach_display(640, 480).unwrap();
    wait_for_frames(&session);

    session.start_record("clip").unwrap();
    assert!(session.is_recording());
    std::thread::sleep(Duration::from_millis(3000));

    let RecordOutcome::Saved { video, summary } = session.stop_record().unwrap() else {
        panic!("3 second recording should be kept");
    };
    assert_eq!((video.width, video.height), (640, 480));
    assert!(
        (2500..=3500).contains(&video.duration_ms),
        "duration {} ms",
        video.duration_ms
    );
    assert!(summary.frames > 60);
    assert_eq!(summary.resumed, 0);
    assert!(video.video_path.exists());

    // Review plays the file in place of the camera
    assert!(wait_until(Duration::from_secs(2), || session.is_playing()));
    assert!(!session.is_previewing());

    let committed = session.commit_record().unwrap();
    assert_eq!(committed.video_path, video.video_path);
    assert!(committed.thumbnail_path.exists());
    assert!(!session.is_playing());
    assert!(session.is_previewing());
    assert!(listener.errors().is_empty());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn front_camera_flash_is_unsupported() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) = session(&camera, test_config(&root));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Front).unwrap();

    let err = session.toggle_flash().unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedOperation(_)));
    assert_eq!(listener.errors(), vec![ErrorKind::UnsupportedOperation]);
    // Policy errors keep the camera running
    assert!(session.is_previewing());
    assert!(!session.torch_on());
}

#[test]
fn switching_camera_turns_torch_off_first() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, _listener) = session(&camera, test_config(&root));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();

    assert!(session.toggle_flash().unwrap());
    assert!(session.torch_on());
    session.switch_camera().unwrap();

    assert_eq!(session.facing(), Facing::Front);
    assert!(!session.torch_on());
    let events = camera.events();
    let torch_off = events.iter().position(|e| e == "torch off back");
    let closed = events.iter().position(|e| e == "close back");
    assert!(torch_off.is_some() && torch_off < closed, "{:?}", events);
    assert!(camera.is_held("front"));
    assert!(!camera.is_held("back"));
}

#[test]
fn switching_camera_while_recording_is_rejected() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, _listener) = session(&camera, test_config(&root));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);
    session.start_record("busy").unwrap();

    assert!(matches!(
        session.switch_camera(),
        Err(CoreError::UnsupportedOperation(_))
    ));
    assert!(matches!(session.start_record("again"), Err(CoreError::EncoderBusy)));
    assert!(session.is_recording());

    session.cancel_record().unwrap();
    assert_eq!(session.facing(), Facing::Back);
}

#[test]
fn second_session_cannot_open_a_held_camera() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut first, _) = session(&camera, test_config(&root));
    let (mut second, listener) = session(&camera, test_config(&root));

    first.attach_display(640, 480).unwrap();
    first.start_preview(Facing::Back).unwrap();

    second.attach_display(640, 480).unwrap();
    let err = second.start_preview(Facing::Back).unwrap_err();
    assert_eq!(err, CoreError::DeviceAlreadyOpen);
    assert_eq!(listener.errors(), vec![ErrorKind::DeviceAlreadyOpen]);
    assert!(first.is_previewing());

    drop(first);
    second.start_preview(Facing::Back).unwrap();
    assert!(second.is_previewing());
}

#[test]
fn recording_survives_display_recreation() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) = session(&camera, test_config(&root));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);

    session.start_record("resumed").unwrap();
    std::thread::sleep(Duration::from_millis(700));
    session.detach_display();
    assert!(session.is_recording());
    assert!(camera.is_held("back"));

    std::thread::sleep(Duration::from_millis(100));
    session.attach_display(640, 480).unwrap();
    wait_for_frames(&session);
    std::thread::sleep(Duration::from_millis(900));

    let RecordOutcome::Saved { summary, .. } = session.stop_record().unwrap() else {
        panic!("recording should be kept");
    };
    assert_eq!(summary.resumed, 1);
    assert!(listener.errors().is_empty());
    session.cancel_record().unwrap();
    assert!(!recording_dir(&root, "resumed").exists());
}

#[test]
fn suspend_releases_the_camera_and_resume_restores_preview() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, _listener) = session(&camera, test_config(&root));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);

    session.start_record("suspended").unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let outcome = session.suspend().unwrap();

    assert!(matches!(outcome, Some(RecordOutcome::TooShort { .. })));
    assert!(!recording_dir(&root, "suspended").exists());
    assert!(!camera.is_held("back"));

    session.resume().unwrap();
    assert!(session.is_previewing());
    wait_for_frames(&session);
}

#[test]
fn auto_stop_is_signalled_at_max_duration() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let config = camera_recorder::Config {
        max_duration_ms: 300,
        ..test_config(&root)
    };
    let (mut session, _listener) = session(&camera, config);
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);

    session.start_record("capped").unwrap();
    assert!(!session.should_auto_stop());
    std::thread::sleep(Duration::from_millis(400));
    assert!(session.should_auto_stop());

    session.cancel_record().unwrap();
    assert!(!session.should_auto_stop());
}

#[test]
fn encoder_failure_resets_the_session() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) =
        session_with_encoder(&camera, test_config(&root), FakeEncoder::failing_on(3));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);

    session.start_record("broken").unwrap();
    assert!(wait_until(Duration::from_secs(3), || !session.is_recording()));
    assert!(session.recording_elapsed().is_none());
    assert!(!session.should_auto_stop());

    let err = session.stop_record().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncodingFailed);
    assert_eq!(listener.errors(), vec![ErrorKind::EncodingFailed]);
    assert!(!recording_dir(&root, "broken").exists());
    assert!(!camera.is_held("back"));
    assert_eq!(session.recording_state(), RecordingState::Off);

    // Nothing is left holding the encoder
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);
    session.start_record("retry").unwrap();
    assert!(session.is_recording());
    session.cancel_record().unwrap();
    assert!(!recording_dir(&root, "retry").exists());
    assert_eq!(listener.errors(), vec![ErrorKind::EncodingFailed]);
}

#[test]
fn encoder_failure_is_recovered_by_the_next_command() {
    let camera = Arc::new(FakeCameraBackend::new());
    let root = temp_root();
    let (mut session, listener) =
        session_with_encoder(&camera, test_config(&root), FakeEncoder::failing_on(2));
    session.attach_display(640, 480).unwrap();
    session.start_preview(Facing::Back).unwrap();
    wait_for_frames(&session);

    session.start_record("broken").unwrap();
    assert!(wait_until(Duration::from_secs(3), || !session.is_recording()));

    // A follow-up command runs the reset instead of reporting EncoderBusy
    session.start_preview(Facing::Back).unwrap();
    assert!(!recording_dir(&root, "broken").exists());
    assert!(session.is_previewing());
    wait_for_frames(&session);
    session.start_record("retry").unwrap();
    session.cancel_record().unwrap();
    assert_eq!(listener.errors(), vec![ErrorKind::EncodingFailed]);
}
