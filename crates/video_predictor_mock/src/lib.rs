//! Deterministic mock implementation of the shared `video_predictor` contract.
//!
//! This crate contains no model or video decoding logic. It simulates a video of a
//! fixed number of frames and records every capability call, for local development
//! and contract-level integration testing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ndarray::{Array2, Array3, ArrayView2, Axis};
use video_predictor::{
    FrameMasks, FrameStream, InferenceState, InitStateRequest, ObjectId, PointPrompt,
    PredictorError, PredictorProfile, PropagateRequest, VideoPredictor,
};

/// Stable predictor identifier used for explicit startup selection.
pub const MOCK_PREDICTOR_ID: &str = "mock";

/// Capability call observed by [`MockPredictor`]. Frame indices are global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictorCall {
    InitState {
        start_frame: usize,
        max_frames: Option<usize>,
    },
    AddNewPoints {
        frame_index: usize,
        object_id: ObjectId,
    },
    AddNewMask {
        frame_index: usize,
        object_id: ObjectId,
    },
    ClearPromptsInFrame {
        frame_index: usize,
        object_id: ObjectId,
    },
    RemoveObject {
        object_id: ObjectId,
    },
    ResetState,
    Propagate {
        start_frame_index: usize,
    },
    FrameYielded {
        frame_index: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum ObjectPrompt {
    Points { frame_index: usize },
    Mask { frame_index: usize, mask: Array2<bool> },
    Cleared,
}

impl ObjectPrompt {
    fn frame_index(&self) -> Option<usize> {
        match self {
            Self::Points { frame_index } | Self::Mask { frame_index, .. } => Some(*frame_index),
            Self::Cleared => None,
        }
    }
}

#[derive(Debug, Default)]
struct MockModel {
    prompts: BTreeMap<ObjectId, ObjectPrompt>,
}

type CallLog = Arc<Mutex<Vec<PredictorCall>>>;

/// Deterministic predictor over a simulated video of `total_frames` frames.
#[derive(Debug)]
pub struct MockPredictor {
    total_frames: usize,
    frame_size: (usize, usize),
    fail_at_frame: Option<usize>,
    calls: CallLog,
}

impl MockPredictor {
    const DEFAULT_FRAME_SIZE: (usize, usize) = (16, 24);

    /// Creates a predictor for a video of `total_frames` frames.
    #[must_use]
    pub fn new(total_frames: usize) -> Self {
        Self {
            total_frames,
            frame_size: Self::DEFAULT_FRAME_SIZE,
            fail_at_frame: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sets the simulated frame size as `(height, width)`.
    #[must_use]
    pub fn with_frame_size(mut self, height: usize, width: usize) -> Self {
        self.frame_size = (height.max(1), width.max(1));
        self
    }

    /// Makes propagation fail when it reaches the given global frame index.
    #[must_use]
    pub fn failing_at_frame(mut self, frame_index: usize) -> Self {
        self.fail_at_frame = Some(frame_index);
        self
    }

    /// Returns every call observed so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<PredictorCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock_unpoisoned(&self.calls).clear();
    }

    /// Returns the start frame of every window loaded so far.
    #[must_use]
    pub fn init_starts(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PredictorCall::InitState { start_frame, .. } => Some(start_frame),
                _ => None,
            })
            .collect()
    }

    /// Returns every global frame index the model produced masks for.
    #[must_use]
    pub fn yielded_frames(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PredictorCall::FrameYielded { frame_index } => Some(frame_index),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PredictorCall) {
        lock_unpoisoned(&self.calls).push(call);
    }

    fn model(state: &InferenceState) -> Result<&MockModel, PredictorError> {
        state
            .model::<MockModel>()
            .ok_or_else(|| PredictorError::failed("inference state was not created by the mock"))
    }

    fn model_mut(state: &mut InferenceState) -> Result<&mut MockModel, PredictorError> {
        state
            .model_mut::<MockModel>()
            .ok_or_else(|| PredictorError::failed("inference state was not created by the mock"))
    }

    fn check_frame(state: &InferenceState, frame_index: usize) -> Result<(), PredictorError> {
        if frame_index >= state.num_frames {
            return Err(PredictorError::FrameOutOfRange {
                frame_index,
                num_frames: state.num_frames,
            });
        }

        Ok(())
    }

    fn check_object(state: &InferenceState, object_id: ObjectId) -> Result<(), PredictorError> {
        if !state.obj_ids.contains(&object_id) {
            return Err(PredictorError::UnknownObject { object_id });
        }

        Ok(())
    }

    fn frame_masks(
        state: &InferenceState,
        frame_index: usize,
    ) -> Result<FrameMasks, PredictorError> {
        let model = Self::model(state)?;
        let prompts = state
            .obj_ids
            .iter()
            .map(|object_id| {
                (
                    *object_id,
                    model
                        .prompts
                        .get(object_id)
                        .cloned()
                        .unwrap_or(ObjectPrompt::Cleared),
                )
            })
            .collect::<Vec<_>>();

        Ok(render_frame(
            frame_index,
            state.start_frame_offset + frame_index,
            (state.video_height, state.video_width),
            &prompts,
        ))
    }
}

impl Default for MockPredictor {
    fn default() -> Self {
        Self::new(120)
    }
}

impl VideoPredictor for MockPredictor {
    fn profile(&self) -> PredictorProfile {
        PredictorProfile {
            predictor_id: MOCK_PREDICTOR_ID.to_string(),
            model_id: "mock-tracker".to_string(),
            device: "cpu".to_string(),
        }
    }

    fn init_state(&self, request: InitStateRequest) -> Result<InferenceState, PredictorError> {
        self.record(PredictorCall::InitState {
            start_frame: request.start_frame,
            max_frames: request.max_frames,
        });

        if request.start_frame >= self.total_frames {
            return Err(PredictorError::EndOfVideo {
                start_frame: request.start_frame,
                num_frames: self.total_frames,
            });
        }

        let remaining = self.total_frames - request.start_frame;
        let num_frames = request
            .max_frames
            .map_or(remaining, |max_frames| max_frames.min(remaining));

        Ok(InferenceState::new(
            request.start_frame,
            num_frames,
            self.frame_size,
            MockModel::default(),
        ))
    }

    fn add_new_points_or_box(
        &self,
        state: &mut InferenceState,
        prompt: PointPrompt,
    ) -> Result<FrameMasks, PredictorError> {
        self.record(PredictorCall::AddNewPoints {
            frame_index: state.start_frame_offset + prompt.frame_index,
            object_id: prompt.object_id,
        });
        Self::check_frame(state, prompt.frame_index)?;
        if prompt.points.len() != prompt.labels.len() {
            return Err(PredictorError::failed(format!(
                "got {} points but {} labels",
                prompt.points.len(),
                prompt.labels.len()
            )));
        }

        track_object(state, prompt.object_id);
        Self::model_mut(state)?.prompts.insert(
            prompt.object_id,
            ObjectPrompt::Points {
                frame_index: prompt.frame_index,
            },
        );

        Self::frame_masks(state, prompt.frame_index)
    }

    fn add_new_mask(
        &self,
        state: &mut InferenceState,
        frame_index: usize,
        object_id: ObjectId,
        mask: ArrayView2<'_, bool>,
    ) -> Result<FrameMasks, PredictorError> {
        self.record(PredictorCall::AddNewMask {
            frame_index: state.start_frame_offset + frame_index,
            object_id,
        });
        Self::check_frame(state, frame_index)?;
        if mask.dim() != (state.video_height, state.video_width) {
            return Err(PredictorError::failed(format!(
                "mask of size {:?} does not match video size {:?}",
                mask.dim(),
                (state.video_height, state.video_width)
            )));
        }

        track_object(state, object_id);
        Self::model_mut(state)?.prompts.insert(
            object_id,
            ObjectPrompt::Mask {
                frame_index,
                mask: mask.to_owned(),
            },
        );

        Self::frame_masks(state, frame_index)
    }

    fn clear_all_prompts_in_frame(
        &self,
        state: &mut InferenceState,
        frame_index: usize,
        object_id: ObjectId,
    ) -> Result<FrameMasks, PredictorError> {
        self.record(PredictorCall::ClearPromptsInFrame {
            frame_index: state.start_frame_offset + frame_index,
            object_id,
        });
        Self::check_frame(state, frame_index)?;
        Self::check_object(state, object_id)?;

        let model = Self::model_mut(state)?;
        if let Some(prompt) = model.prompts.get_mut(&object_id) {
            if prompt.frame_index() == Some(frame_index) {
                *prompt = ObjectPrompt::Cleared;
            }
        }

        Self::frame_masks(state, frame_index)
    }

    fn remove_object(
        &self,
        state: &mut InferenceState,
        object_id: ObjectId,
    ) -> Result<Vec<FrameMasks>, PredictorError> {
        self.record(PredictorCall::RemoveObject { object_id });
        Self::check_object(state, object_id)?;

        state.obj_ids.retain(|tracked| *tracked != object_id);
        let model = Self::model_mut(state)?;
        model.prompts.remove(&object_id);

        let mut prompted_frames = model
            .prompts
            .values()
            .filter_map(ObjectPrompt::frame_index)
            .collect::<Vec<_>>();
        prompted_frames.sort_unstable();
        prompted_frames.dedup();

        prompted_frames
            .into_iter()
            .map(|frame_index| Self::frame_masks(state, frame_index))
            .collect()
    }

    fn reset_state(&self, state: &mut InferenceState) -> Result<(), PredictorError> {
        self.record(PredictorCall::ResetState);
        state.obj_ids.clear();
        Self::model_mut(state)?.prompts.clear();
        Ok(())
    }

    fn propagate_in_video(
        &self,
        state: &mut InferenceState,
        request: PropagateRequest,
    ) -> Result<FrameStream, PredictorError> {
        self.record(PredictorCall::Propagate {
            start_frame_index: state.start_frame_offset + request.start_frame_index,
        });
        Self::check_frame(state, request.start_frame_index)?;

        let last = state.num_frames - 1;
        let start = request.start_frame_index;
        let span = request.max_frame_num_to_track.unwrap_or(last);
        let frames: Vec<usize> = if request.reverse {
            (start.saturating_sub(span)..=start).rev().collect()
        } else {
            (start..=start.saturating_add(span).min(last)).collect()
        };

        let model = Self::model(state)?;
        let prompts = state
            .obj_ids
            .iter()
            .map(|object_id| {
                (
                    *object_id,
                    model
                        .prompts
                        .get(object_id)
                        .cloned()
                        .unwrap_or(ObjectPrompt::Cleared),
                )
            })
            .collect();

        Ok(Box::new(MockFrameStream {
            frames: frames.into_iter(),
            chunk_offset: state.start_frame_offset,
            video_size: (state.video_height, state.video_width),
            prompts,
            fail_at_frame: self.fail_at_frame,
            failed: false,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct MockFrameStream {
    frames: std::vec::IntoIter<usize>,
    chunk_offset: usize,
    video_size: (usize, usize),
    prompts: Vec<(ObjectId, ObjectPrompt)>,
    fail_at_frame: Option<usize>,
    failed: bool,
    calls: CallLog,
}

impl Iterator for MockFrameStream {
    type Item = Result<FrameMasks, PredictorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let frame_index = self.frames.next()?;
        let global_index = self.chunk_offset + frame_index;
        lock_unpoisoned(&self.calls).push(PredictorCall::FrameYielded {
            frame_index: global_index,
        });

        if self.fail_at_frame == Some(global_index) {
            self.failed = true;
            return Some(Err(PredictorError::failed(format!(
                "mock model failure at frame {global_index}"
            ))));
        }

        Some(Ok(render_frame(
            frame_index,
            global_index,
            self.video_size,
            &self.prompts,
        )))
    }
}

fn track_object(state: &mut InferenceState, object_id: ObjectId) {
    if let Err(position) = state.obj_ids.binary_search(&object_id) {
        state.obj_ids.insert(position, object_id);
    }
}

fn render_frame(
    frame_index: usize,
    global_index: usize,
    video_size: (usize, usize),
    prompts: &[(ObjectId, ObjectPrompt)],
) -> FrameMasks {
    let (height, width) = video_size;
    let mut masks = Array3::from_elem((prompts.len(), height, width), -1.0f32);

    for ((object_id, prompt), mut logits) in prompts.iter().zip(masks.axis_iter_mut(Axis(0))) {
        match prompt {
            ObjectPrompt::Mask { mask, .. } => {
                logits.zip_mut_with(mask, |logit, on| *logit = if *on { 1.0 } else { -1.0 });
            }
            ObjectPrompt::Points { .. } => {
                let (row, col, side) = synthetic_square(*object_id, global_index, video_size);
                logits
                    .slice_mut(ndarray::s![row..row + side, col..col + side])
                    .fill(1.0);
            }
            ObjectPrompt::Cleared => {}
        }
    }

    FrameMasks {
        frame_index,
        object_ids: prompts.iter().map(|(object_id, _)| *object_id).collect(),
        masks,
    }
}

fn synthetic_square(
    object_id: ObjectId,
    global_index: usize,
    video_size: (usize, usize),
) -> (usize, usize, usize) {
    let (height, width) = video_size;
    let side = (height.min(width) / 4).max(1);
    let row = (object_id as usize * 3) % (height - side + 1);
    let col = (object_id as usize * 5 + global_index) % (width - side + 1);
    (row, col, side)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
