//! Per-session state owned by the session store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;
use ndarray::Axis;
use video_predictor::{FrameMasks, InferenceState, InitStateRequest, ObjectId, VideoPredictor};

use crate::error::InferenceError;
use crate::mask::{encode, BinaryMask};
use crate::types::{PropagateDataResponse, PropagateDataValue, SessionId};

/// The window of frames currently loaded into the model.
pub(crate) struct LiveChunk {
    pub(crate) state: InferenceState,
    /// Window length that was requested when the chunk was loaded.
    pub(crate) window: usize,
}

impl LiveChunk {
    pub(crate) fn new(state: InferenceState, window: usize) -> Self {
        Self { state, window }
    }

    pub(crate) fn offset(&self) -> usize {
        self.state.start_frame_offset
    }

    /// A window shorter than requested ends at the last frame of the video.
    pub(crate) fn reaches_end_of_video(&self) -> bool {
        self.state.num_frames < self.window
    }
}

pub struct Session {
    id: SessionId,
    video_path: PathBuf,
    chunk: LiveChunk,
    tracked_objects: BTreeSet<ObjectId>,
    latest_masks: BTreeMap<ObjectId, BinaryMask>,
    frames_seen: usize,
}

impl Session {
    pub(crate) fn new(id: SessionId, video_path: PathBuf, chunk: LiveChunk) -> Self {
        Self {
            id,
            video_path,
            chunk,
            tracked_objects: BTreeSet::new(),
            latest_masks: BTreeMap::new(),
            frames_seen: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    /// Global index of the first frame of the live chunk.
    #[must_use]
    pub fn chunk_offset(&self) -> usize {
        self.chunk.offset()
    }

    /// One past the highest global frame index produced so far.
    #[must_use]
    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    #[must_use]
    pub fn tracked_objects(&self) -> &BTreeSet<ObjectId> {
        &self.tracked_objects
    }

    /// Returns `(height, width)`.
    #[must_use]
    pub fn video_size(&self) -> (usize, usize) {
        (self.chunk.state.video_height, self.chunk.state.video_width)
    }

    pub(crate) fn chunk(&self) -> &LiveChunk {
        &self.chunk
    }

    pub(crate) fn chunk_mut(&mut self) -> &mut LiveChunk {
        &mut self.chunk
    }

    pub(crate) fn replace_chunk(&mut self, chunk: LiveChunk) {
        debug!(
            "session {}: live chunk moves from frame {} to frame {} ({} frames)",
            self.id,
            self.chunk.offset(),
            chunk.offset(),
            chunk.state.num_frames
        );
        self.chunk = chunk;
    }

    /// Makes sure the live chunk holds `frame_index` and returns its chunk-local index.
    ///
    /// A frame outside the live chunk loads a fresh chunk starting at that frame.
    pub(crate) fn load_chunk_for(
        &mut self,
        predictor: &dyn VideoPredictor,
        frame_index: usize,
        chunk_size: usize,
        offload_video_to_cpu: bool,
    ) -> Result<usize, InferenceError> {
        if !self.chunk.state.covers(frame_index) {
            let state = predictor
                .init_state(InitStateRequest {
                    video_path: self.video_path.clone(),
                    offload_video_to_cpu,
                    start_frame: frame_index,
                    max_frames: Some(chunk_size),
                })
                .map_err(|error| {
                    if error.is_end_of_video() {
                        InferenceError::FrameOutOfRange { frame_index }
                    } else {
                        error.into()
                    }
                })?;
            self.replace_chunk(LiveChunk::new(state, chunk_size));
        }

        Ok(frame_index - self.chunk.offset())
    }

    /// Masks to seed a freshly loaded chunk with, one per object.
    pub(crate) fn seed_masks(&self) -> Vec<(ObjectId, BinaryMask)> {
        self.latest_masks
            .iter()
            .map(|(object_id, mask)| (*object_id, mask.clone()))
            .collect()
    }

    /// Records a model frame as the newest known state and returns its encoded result.
    pub(crate) fn record_frame(
        &mut self,
        frame_index: usize,
        frame: &FrameMasks,
    ) -> PropagateDataResponse {
        let masks = binary_masks(frame);
        let response = frame_response(frame_index, &masks);

        self.tracked_objects
            .extend(masks.iter().map(|(object_id, _)| *object_id));
        self.latest_masks = masks.into_iter().collect();
        self.frames_seen = self.frames_seen.max(frame_index + 1);

        response
    }

    pub(crate) fn forget_object(&mut self, object_id: ObjectId) {
        self.tracked_objects.remove(&object_id);
        self.latest_masks.remove(&object_id);
    }

    pub(crate) fn forget_all_objects(&mut self) {
        self.tracked_objects.clear();
        self.latest_masks.clear();
    }
}

/// Thresholds every object's logits into a binary mask.
pub(crate) fn binary_masks(frame: &FrameMasks) -> Vec<(ObjectId, BinaryMask)> {
    frame
        .object_ids
        .iter()
        .zip(frame.masks.axis_iter(Axis(0)))
        .map(|(object_id, logits)| (*object_id, BinaryMask::from_logits(logits)))
        .collect()
}

pub(crate) fn frame_response(
    frame_index: usize,
    masks: &[(ObjectId, BinaryMask)],
) -> PropagateDataResponse {
    PropagateDataResponse {
        frame_index,
        results: masks
            .iter()
            .map(|(object_id, mask)| PropagateDataValue {
                object_id: *object_id,
                mask: encode(mask),
            })
            .collect(),
    }
}

/// Point-in-time view of a session, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub video_path: PathBuf,
    pub chunk_offset: usize,
    pub frames_seen: usize,
    pub tracked_objects: BTreeSet<ObjectId>,
    pub video_size: (usize, usize),
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            video_path: session.video_path.clone(),
            chunk_offset: session.chunk_offset(),
            frames_seen: session.frames_seen,
            tracked_objects: session.tracked_objects.clone(),
            video_size: session.video_size(),
        }
    }
}
