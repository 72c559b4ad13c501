//! Inference sessions over videos longer than the model's frame window.
//!
//! An [`InferenceApi`] owns sessions. Each session keeps one window ("chunk") of
//! frames loaded in the model; propagation walks the video chunk by chunk and
//! yields one gap-free stream of per-frame masks. Mutating calls can be journaled
//! to a JSON-lines file and replayed later with [`replay::replay_requests`].
//!
//! # Public API Overview
//! - Start, prompt, propagate and close sessions through [`InferenceApi`].
//! - Iterate a [`PropagationStream`] for frame results; dropping it releases the session.
//! - Encode and decode masks with [`mask::encode`] and [`mask::decode`].
//! - Reconstruct journaled calls with [`Request::decode`].

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mask;
pub mod predictors;
pub mod replay;
pub mod session;
pub mod types;

pub use crate::api::{InferenceApi, PropagationStream, RecordingGuard};
pub use crate::config::InferenceConfig;
pub use crate::engine::ChunkCursor;
pub use crate::error::InferenceError;
pub use crate::mask::{BinaryMask, Mask, MaskError};
pub use crate::replay::{replay_requests, ReplayOutput, ReplayReport};
pub use crate::session::{Session, SessionSnapshot};
pub use crate::types::{
    AddMaskRequest, AddPointsRequest, ClearPointsInFrameRequest, ClearPointsInVideoRequest,
    ClearPointsInVideoResponse, CloseSessionRequest, CloseSessionResponse, Operation,
    PropagateDataResponse, PropagateDataValue, PropagateInVideoRequest, RemoveObjectRequest,
    RemoveObjectResponse, Request, RequestDecodeError, RequestType, SessionId,
    StartSessionRequest, StartSessionResponse,
};
