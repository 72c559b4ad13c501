//! Model-agnostic contract for a video segmentation predictor.
//!
//! This crate defines only the capability surface the session manager consumes:
//! loading a window of frames into a model state, prompting objects on a frame,
//! and propagating masks forward through the loaded window. It excludes video
//! decoding, tensor placement and anything that spans more than one window.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use ndarray::{Array3, ArrayView2};

/// Identifier of one tracked object.
pub type ObjectId = u32;

/// Lazy sequence of per-frame masks produced by [`VideoPredictor::propagate_in_video`].
///
/// The stream owns everything it needs; it never borrows the state it was started from.
pub type FrameStream = Box<dyn Iterator<Item = Result<FrameMasks, PredictorError>> + Send>;

/// Error reported by a predictor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictorError {
    /// A window was requested at or beyond the last frame of the video.
    EndOfVideo { start_frame: usize, num_frames: usize },
    /// A chunk-local frame index outside the loaded window.
    FrameOutOfRange { frame_index: usize, num_frames: usize },
    /// An object id the state does not track.
    UnknownObject { object_id: ObjectId },
    /// Any other model failure.
    Failed(String),
}

impl PredictorError {
    /// Creates a generic model failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true for the recognized end-of-video condition.
    #[must_use]
    pub fn is_end_of_video(&self) -> bool {
        matches!(self, Self::EndOfVideo { .. })
    }
}

impl fmt::Display for PredictorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfVideo {
                start_frame,
                num_frames,
            } => write!(
                f,
                "end of video: start frame {start_frame} is beyond the last of {num_frames} frames"
            ),
            Self::FrameOutOfRange {
                frame_index,
                num_frames,
            } => write!(
                f,
                "frame {frame_index} is outside the loaded window of {num_frames} frames"
            ),
            Self::UnknownObject { object_id } => write!(f, "unknown object id {object_id}"),
            Self::Failed(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for PredictorError {}

impl From<String> for PredictorError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for PredictorError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Immutable metadata describing a predictor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictorProfile {
    pub predictor_id: String,
    pub model_id: String,
    /// Device the model runs on, as reported by the predictor.
    pub device: String,
}

/// Input required to load a window of frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitStateRequest {
    pub video_path: PathBuf,
    pub offload_video_to_cpu: bool,
    /// Global index of the first frame in the window.
    pub start_frame: usize,
    /// Upper bound on the window length; `None` loads through the end of the video.
    pub max_frames: Option<usize>,
}

/// Model state for one loaded window of frames.
///
/// Frame indices passed to predictor calls are local to the window: local frame 0
/// is global frame `start_frame_offset`.
pub struct InferenceState {
    pub start_frame_offset: usize,
    pub num_frames: usize,
    pub video_height: usize,
    pub video_width: usize,
    pub obj_ids: Vec<ObjectId>,
    model: Box<dyn Any + Send>,
}

impl InferenceState {
    /// Creates a state carrying an implementation-owned model payload.
    #[must_use]
    pub fn new(
        start_frame_offset: usize,
        num_frames: usize,
        video_size: (usize, usize),
        model: impl Any + Send,
    ) -> Self {
        Self {
            start_frame_offset,
            num_frames,
            video_height: video_size.0,
            video_width: video_size.1,
            obj_ids: Vec::new(),
            model: Box::new(model),
        }
    }

    /// Returns the model payload when it has type `T`.
    #[must_use]
    pub fn model<T: Any>(&self) -> Option<&T> {
        self.model.downcast_ref::<T>()
    }

    /// Returns the mutable model payload when it has type `T`.
    pub fn model_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.model.downcast_mut::<T>()
    }

    /// Returns whether the global frame index falls inside this window.
    #[must_use]
    pub fn covers(&self, global_frame_index: usize) -> bool {
        global_frame_index >= self.start_frame_offset
            && global_frame_index < self.start_frame_offset + self.num_frames
    }

    /// Returns the last global frame index of this window.
    #[must_use]
    pub fn end_frame(&self) -> usize {
        self.start_frame_offset + self.num_frames.saturating_sub(1)
    }
}

impl fmt::Debug for InferenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceState")
            .field("start_frame_offset", &self.start_frame_offset)
            .field("num_frames", &self.num_frames)
            .field("video_height", &self.video_height)
            .field("video_width", &self.video_width)
            .field("obj_ids", &self.obj_ids)
            .finish_non_exhaustive()
    }
}

/// Masks for every tracked object on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMasks {
    /// Chunk-local frame index.
    pub frame_index: usize,
    pub object_ids: Vec<ObjectId>,
    /// Mask logits shaped `(objects, height, width)`; a pixel is foreground when `> 0.0`.
    pub masks: Array3<f32>,
}

impl FrameMasks {
    /// Creates an empty frame result for a video of the given size.
    #[must_use]
    pub fn empty(frame_index: usize, video_size: (usize, usize)) -> Self {
        Self {
            frame_index,
            object_ids: Vec::new(),
            masks: Array3::zeros((0, video_size.0, video_size.1)),
        }
    }
}

/// Click prompt for one object on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PointPrompt {
    /// Chunk-local frame index.
    pub frame_index: usize,
    pub object_id: ObjectId,
    pub points: Vec<[f32; 2]>,
    /// `1` for a positive click, `0` for a negative one.
    pub labels: Vec<i32>,
    pub clear_old_points: bool,
    pub normalize_coords: bool,
}

/// Parameters for one forward (or reverse) propagation pass over a loaded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagateRequest {
    /// Chunk-local frame index to start from.
    pub start_frame_index: usize,
    pub max_frame_num_to_track: Option<usize>,
    pub reverse: bool,
}

impl PropagateRequest {
    /// Forward propagation from a local frame through the end of the window.
    #[must_use]
    pub fn forward_from(start_frame_index: usize) -> Self {
        Self {
            start_frame_index,
            max_frame_num_to_track: None,
            reverse: false,
        }
    }
}

/// Segmentation model capability driven by the session manager.
///
/// Every call blocks until the model has produced its result.
pub trait VideoPredictor: Send + Sync + 'static {
    /// Returns predictor/model identity metadata.
    fn profile(&self) -> PredictorProfile;

    /// Loads a window of frames into a fresh model state.
    ///
    /// Fails with [`PredictorError::EndOfVideo`] when `start_frame` is at or beyond
    /// the video's frame count.
    fn init_state(&self, request: InitStateRequest) -> Result<InferenceState, PredictorError>;

    /// Adds click prompts for one object and returns the masks on that frame.
    fn add_new_points_or_box(
        &self,
        state: &mut InferenceState,
        prompt: PointPrompt,
    ) -> Result<FrameMasks, PredictorError>;

    /// Conditions one object on a binary mask and returns the masks on that frame.
    fn add_new_mask(
        &self,
        state: &mut InferenceState,
        frame_index: usize,
        object_id: ObjectId,
        mask: ArrayView2<'_, bool>,
    ) -> Result<FrameMasks, PredictorError>;

    /// Drops the prompts of one object on one frame and returns the remaining masks.
    fn clear_all_prompts_in_frame(
        &self,
        state: &mut InferenceState,
        frame_index: usize,
        object_id: ObjectId,
    ) -> Result<FrameMasks, PredictorError>;

    /// Stops tracking an object and returns the re-rendered prompted frames.
    fn remove_object(
        &self,
        state: &mut InferenceState,
        object_id: ObjectId,
    ) -> Result<Vec<FrameMasks>, PredictorError>;

    /// Drops every prompt and tracked object.
    fn reset_state(&self, state: &mut InferenceState) -> Result<(), PredictorError>;

    /// Starts propagating masks through the loaded window.
    fn propagate_in_video(
        &self,
        state: &mut InferenceState,
        request: PropagateRequest,
    ) -> Result<FrameStream, PredictorError>;
}
