mod support;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use chunked_inference::mask::encode;
use chunked_inference::{
    AddMaskRequest, AddPointsRequest, BinaryMask, ClearPointsInFrameRequest,
    ClearPointsInVideoRequest, CloseSessionRequest, InferenceApi, InferenceError, Mask,
    PropagateInVideoRequest, RemoveObjectRequest, StartSessionRequest,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{api, journal_entries, propagate, recording_api, start};
use video_predictor_mock::MockPredictor;

fn points(session_id: &str, frame_index: usize, object_id: u32) -> AddPointsRequest {
    AddPointsRequest {
        session_id: session_id.to_string(),
        frame_index,
        object_id,
        points: vec![[3.0, 5.0]],
        labels: vec![1],
        clear_old_points: true,
    }
}

fn close(api: &InferenceApi, session_id: &str) -> bool {
    api.close_session(CloseSessionRequest {
        session_id: session_id.to_string(),
    })
    .expect("close should not fail")
    .success
}

#[test]
fn start_session_assigns_unique_ids() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);

    let first = api
        .start_session(StartSessionRequest {
            path: "a.mp4".to_string(),
            session_id: None,
        })
        .expect("session should start")
        .session_id;
    let second = api
        .start_session(StartSessionRequest {
            path: "a.mp4".to_string(),
            session_id: None,
        })
        .expect("session should start")
        .session_id;

    assert_ne!(first, second);
    assert_eq!(first.len(), 36);
    assert_eq!(api.session_count(), 2);
}

#[test]
fn start_session_rejects_a_live_id() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);
    start(&api, "s-1");

    let error = api
        .start_session(StartSessionRequest {
            path: "b.mp4".to_string(),
            session_id: Some("s-1".to_string()),
        })
        .expect_err("duplicate id must fail");

    assert_matches!(error, InferenceError::SessionAlreadyExists { .. });
    assert_eq!(api.session_count(), 1);
}

#[test]
fn start_session_on_empty_video_fails() {
    let predictor = Arc::new(MockPredictor::new(0));
    let api = api(&predictor, 4);

    let error = api
        .start_session(StartSessionRequest {
            path: "empty.mp4".to_string(),
            session_id: None,
        })
        .expect_err("empty video must fail");

    assert_matches!(error, InferenceError::EmptyVideo { .. });
    assert_eq!(api.session_count(), 0);
}

#[test]
fn closed_sessions_are_not_found() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");

    assert!(close(&api, &session_id));
    assert_eq!(api.session_count(), 0);
    assert!(!close(&api, &session_id));

    assert_matches!(
        api.add_points(points(&session_id, 0, 1)),
        Err(InferenceError::SessionNotFound { .. })
    );
    assert_matches!(
        propagate(&api, &session_id, 0),
        Err(InferenceError::SessionNotFound { .. })
    );
}

#[test]
fn add_points_returns_the_prompted_frame() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");

    let frame = api
        .add_points(points(&session_id, 2, 7))
        .expect("points should apply");

    assert_eq!(frame.frame_index, 2);
    assert_eq!(frame.results.len(), 1);
    assert_eq!(frame.results[0].object_id, 7);
    let snapshot = api.session_snapshot(&session_id).expect("session exists");
    assert_eq!(snapshot.tracked_objects.into_iter().collect::<Vec<_>>(), vec![7]);
}

#[test]
fn add_points_rejects_mismatched_labels() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");

    let mut request = points(&session_id, 0, 1);
    request.labels.push(0);

    assert_matches!(
        api.add_points(request),
        Err(InferenceError::InvalidRequest(_))
    );
}

#[test]
fn prompts_outside_the_live_chunk_load_that_chunk() {
    let predictor = Arc::new(MockPredictor::new(20));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");

    let frame = api
        .add_points(points(&session_id, 13, 1))
        .expect("points should apply");

    assert_eq!(frame.frame_index, 13);
    assert_eq!(predictor.init_starts(), vec![0, 13]);
    let snapshot = api.session_snapshot(&session_id).expect("session exists");
    assert_eq!(snapshot.chunk_offset, 13);

    assert_matches!(
        api.add_points(points(&session_id, 20, 1)),
        Err(InferenceError::FrameOutOfRange { frame_index: 20 })
    );
}

#[test]
fn add_mask_validates_size_and_echoes_the_mask() {
    let predictor = Arc::new(MockPredictor::new(10).with_frame_size(8, 6));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");
    let mask = BinaryMask::from_fn(8, 6, |row, col| row < 3 && col > 2);

    let frame = api
        .add_mask(AddMaskRequest {
            session_id: session_id.clone(),
            frame_index: 1,
            object_id: 4,
            mask: encode(&mask),
        })
        .expect("mask should apply");
    assert_eq!(frame.results[0].mask, encode(&mask));

    let error = api
        .add_mask(AddMaskRequest {
            session_id,
            frame_index: 1,
            object_id: 4,
            mask: encode(&BinaryMask::new(6, 8)),
        })
        .expect_err("mask of the wrong size must fail");
    assert_matches!(error, InferenceError::InvalidRequest(_));
}

#[test]
fn add_mask_rejects_a_mismatched_size_before_decoding() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");
    // A single background run covering all 200000x200000 pixels.
    let mask = Mask::new([200_000, 200_000], "PPToRXU1").expect("run should cover the size");

    let error = api
        .add_mask(AddMaskRequest {
            session_id,
            frame_index: 0,
            object_id: 1,
            mask,
        })
        .expect_err("mask of the wrong size must fail");

    assert_matches!(error, InferenceError::InvalidRequest(_));
}

#[test]
fn clearing_and_removing_objects() {
    let predictor = Arc::new(MockPredictor::new(10));
    let api = api(&predictor, 4);
    let session_id = start(&api, "s-1");
    api.add_points(points(&session_id, 1, 1))
        .expect("points should apply");
    api.add_points(points(&session_id, 2, 2))
        .expect("points should apply");

    let cleared = api
        .clear_points_in_frame(ClearPointsInFrameRequest {
            session_id: session_id.clone(),
            frame_index: 2,
            object_id: 2,
        })
        .expect("clear should succeed");
    let object_two = cleared
        .results
        .iter()
        .find(|value| value.object_id == 2)
        .expect("object 2 is still tracked");
    assert_eq!(object_two.mask.decode().map(|mask| mask.area()), Ok(0));

    let removed = api
        .remove_object(RemoveObjectRequest {
            session_id: session_id.clone(),
            object_id: 1,
        })
        .expect("remove should succeed");
    assert!(removed
        .results
        .iter()
        .all(|frame| frame.results.iter().all(|value| value.object_id != 1)));
    let snapshot = api.session_snapshot(&session_id).expect("session exists");
    assert_eq!(snapshot.tracked_objects.into_iter().collect::<Vec<_>>(), vec![2]);

    let response = api
        .clear_points_in_video(ClearPointsInVideoRequest {
            session_id: session_id.clone(),
        })
        .expect("clear video should succeed");
    assert!(response.success);
    let snapshot = api.session_snapshot(&session_id).expect("session exists");
    assert!(snapshot.tracked_objects.is_empty());

    let frames = propagate(&api, &session_id, 0).expect("propagation should succeed");
    assert!(frames.iter().all(|frame| frame.results.is_empty()));
}

#[test]
fn every_mutating_call_is_journaled_in_order() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let journal_path = dir.path().join("api_requests.jsonl");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &journal_path);

    let session_id = api
        .start_session(StartSessionRequest {
            path: "clip.mp4".to_string(),
            session_id: None,
        })
        .expect("session should start")
        .session_id;
    api.add_points(points(&session_id, 0, 1))
        .expect("points should apply");
    api.session_snapshot(&session_id).expect("session exists");
    propagate(&api, &session_id, 0).expect("propagation should succeed");
    close(&api, &session_id);

    let entries = journal_entries(&journal_path);
    let methods = entries
        .iter()
        .map(|entry| entry.method.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        methods,
        vec!["start_session", "add_points", "propagate_in_video", "close_session"]
    );
    assert_eq!(entries[0].request_type, "StartSessionRequest");
    assert_eq!(
        entries[0].request_data,
        json!({"path": "clip.mp4", "session_id": session_id})
    );
    assert_eq!(
        entries[2].request_data,
        json!({"session_id": session_id, "start_frame_index": 0})
    );
    assert!(entries
        .iter()
        .all(|entry| entry.request_data.get("type").is_none()));
}

fn journaled_methods(path: &Path) -> Vec<String> {
    journal_entries(path)
        .into_iter()
        .map(|entry| entry.method)
        .collect()
}

#[test]
fn calls_waiting_on_a_busy_session_are_journaled_when_they_run() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let journal_path = dir.path().join("api_requests.jsonl");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &journal_path);
    let session_id = start(&api, "s-1");

    let stream = api
        .propagate_in_video(PropagateInVideoRequest {
            session_id: session_id.clone(),
            start_frame_index: 0,
        })
        .expect("stream should start");

    let api = &api;
    thread::scope(|scope| {
        let waiting = scope.spawn(move || api.add_points(points(&session_id, 0, 1)).is_ok());

        thread::sleep(Duration::from_millis(200));
        assert_eq!(
            journaled_methods(&journal_path),
            vec!["start_session", "propagate_in_video"]
        );

        drop(stream);
        assert!(waiting.join().expect("caller thread should not panic"));
    });

    assert_eq!(
        journaled_methods(&journal_path),
        vec!["start_session", "propagate_in_video", "add_points"]
    );
}

#[test]
fn calls_after_close_are_journaled_after_the_close() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let journal_path = dir.path().join("api_requests.jsonl");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &journal_path);
    let session_id = start(&api, "s-1");

    assert!(close(&api, &session_id));
    assert_matches!(
        api.remove_object(RemoveObjectRequest {
            session_id: session_id.clone(),
            object_id: 1,
        }),
        Err(InferenceError::SessionNotFound { .. })
    );

    assert_eq!(
        journaled_methods(&journal_path),
        vec!["start_session", "close_session", "remove_object"]
    );
}

#[test]
fn failing_calls_are_journaled_too() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let journal_path = dir.path().join("api_requests.jsonl");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &journal_path);

    api.add_points(points("missing", 0, 1))
        .expect_err("unknown session must fail");

    let entries = journal_entries(&journal_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].method, "add_points");
}

#[test]
fn from_config_opens_the_journal_under_the_data_path() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let predictor = Arc::new(MockPredictor::new(6));
    let config = support::config(4)
        .with_data_path(dir.path().join("data"))
        .with_record_requests(true);

    let api = InferenceApi::from_config(predictor, config).expect("store should open");
    assert!(api.is_recording());
    start(&api, "s-1");

    let entries = journal_entries(&dir.path().join("data").join("api_requests.jsonl"));
    assert_eq!(entries.len(), 1);
}

#[test]
fn suspended_recording_resumes_after_the_guard_drops() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let journal_path = dir.path().join("api_requests.jsonl");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &journal_path);

    {
        let _guard = api.suspend_recording();
        assert!(!api.is_recording());
        start(&api, "quiet");
    }
    assert!(api.is_recording());
    start(&api, "loud");

    let entries = journal_entries(&journal_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request_data["session_id"], json!("loud"));
}

#[test]
fn suspended_recording_is_restored_when_a_panic_unwinds() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let journal_path = dir.path().join("api_requests.jsonl");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &journal_path);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = api.suspend_recording();
        panic!("replay step failed");
    }));

    assert!(result.is_err());
    assert!(api.is_recording());
}

#[test]
fn nested_suspension_keeps_recording_off_until_the_outer_guard_drops() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let predictor = Arc::new(MockPredictor::new(6));
    let api = recording_api(&predictor, 4, &dir.path().join("api_requests.jsonl"));

    let outer = api.suspend_recording();
    {
        let _inner = api.suspend_recording();
    }
    assert!(!api.is_recording());
    drop(outer);
    assert!(api.is_recording());
}
