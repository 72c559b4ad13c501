#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chunked_inference::{
    InferenceApi, InferenceConfig, InferenceError, PropagateDataResponse, PropagateInVideoRequest,
    StartSessionRequest,
};
use ndarray::ArrayView2;
use request_journal::{JournalEntry, JournalReader, RequestJournal};
use video_predictor::{
    FrameMasks, FrameStream, InferenceState, InitStateRequest, ObjectId, PointPrompt,
    PredictorError, PredictorProfile, PropagateRequest, VideoPredictor,
};
use video_predictor_mock::MockPredictor;

pub fn config(chunk_size: usize) -> InferenceConfig {
    InferenceConfig::default().with_chunk_size(chunk_size)
}

pub fn api(predictor: &Arc<MockPredictor>, chunk_size: usize) -> InferenceApi {
    chunked_inference::logging::init_test_logging();
    InferenceApi::new(predictor.clone(), config(chunk_size))
}

pub fn recording_api(
    predictor: &Arc<MockPredictor>,
    chunk_size: usize,
    journal_path: &Path,
) -> InferenceApi {
    let journal = RequestJournal::open(journal_path).expect("journal should open");
    api(predictor, chunk_size).with_journal(journal)
}

pub fn start(api: &InferenceApi, session_id: &str) -> String {
    api.start_session(StartSessionRequest {
        path: "videos/clip.mp4".to_string(),
        session_id: Some(session_id.to_string()),
    })
    .expect("session should start")
    .session_id
}

pub fn propagate(
    api: &InferenceApi,
    session_id: &str,
    start_frame_index: usize,
) -> Result<Vec<PropagateDataResponse>, InferenceError> {
    api.propagate_in_video(PropagateInVideoRequest {
        session_id: session_id.to_string(),
        start_frame_index,
    })?
    .collect()
}

pub fn frame_indices(frames: &[PropagateDataResponse]) -> Vec<usize> {
    frames.iter().map(|frame| frame.frame_index).collect()
}

pub fn journal_entries(path: &Path) -> Vec<JournalEntry> {
    JournalReader::open(path)
        .expect("journal should open")
        .map(|record| {
            record
                .expect("journal should be readable")
                .entry
                .expect("entry should parse")
        })
        .collect()
}

/// Reports every window as full and signals end of video only once a window
/// would start at or past `end_of_video`.
pub struct FullWindowPredictor {
    inner: MockPredictor,
    end_of_video: usize,
}

impl FullWindowPredictor {
    pub fn new(end_of_video: usize) -> Self {
        Self {
            inner: MockPredictor::new(usize::MAX / 2),
            end_of_video,
        }
    }

    pub fn inner(&self) -> &MockPredictor {
        &self.inner
    }
}

impl VideoPredictor for FullWindowPredictor {
    fn profile(&self) -> PredictorProfile {
        self.inner.profile()
    }

    fn init_state(&self, request: InitStateRequest) -> Result<InferenceState, PredictorError> {
        if request.start_frame >= self.end_of_video {
            return Err(PredictorError::EndOfVideo {
                start_frame: request.start_frame,
                num_frames: self.end_of_video,
            });
        }
        self.inner.init_state(request)
    }

    fn add_new_points_or_box(
        &self,
        state: &mut InferenceState,
        prompt: PointPrompt,
    ) -> Result<FrameMasks, PredictorError> {
        self.inner.add_new_points_or_box(state, prompt)
    }

    fn add_new_mask(
        &self,
        state: &mut InferenceState,
        frame_index: usize,
        object_id: ObjectId,
        mask: ArrayView2<'_, bool>,
    ) -> Result<FrameMasks, PredictorError> {
        self.inner.add_new_mask(state, frame_index, object_id, mask)
    }

    fn clear_all_prompts_in_frame(
        &self,
        state: &mut InferenceState,
        frame_index: usize,
        object_id: ObjectId,
    ) -> Result<FrameMasks, PredictorError> {
        self.inner
            .clear_all_prompts_in_frame(state, frame_index, object_id)
    }

    fn remove_object(
        &self,
        state: &mut InferenceState,
        object_id: ObjectId,
    ) -> Result<Vec<FrameMasks>, PredictorError> {
        self.inner.remove_object(state, object_id)
    }

    fn reset_state(&self, state: &mut InferenceState) -> Result<(), PredictorError> {
        self.inner.reset_state(state)
    }

    fn propagate_in_video(
        &self,
        state: &mut InferenceState,
        request: PropagateRequest,
    ) -> Result<FrameStream, PredictorError> {
        self.inner.propagate_in_video(state, request)
    }
}
