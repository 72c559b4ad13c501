use std::path::PathBuf;

use request_journal::JournalError;
use thiserror::Error;
use video_predictor::PredictorError;

use crate::mask::MaskError;
use crate::types::RequestDecodeError;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("session {session_id} already exists")]
    SessionAlreadyExists { session_id: String },

    #[error("video {path} has no frames")]
    EmptyVideo { path: PathBuf },

    #[error("frame {frame_index} is beyond the end of the video")]
    FrameOutOfRange { frame_index: usize },

    #[error("propagation expected frame {expected} but the model produced frame {found}")]
    FrameGap { expected: usize, found: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown operation {method}")]
    UnknownMethod { method: String },

    #[error("operation {method} does not take {request_type}")]
    RequestTypeMismatch {
        method: String,
        request_type: String,
    },

    #[error("failed to serialize {request_type} for the journal: {source}")]
    RequestSerialize {
        request_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    RequestDecode(#[from] RequestDecodeError),

    #[error(transparent)]
    Mask(#[from] MaskError),

    #[error("model failure: {0}")]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl InferenceError {
    pub(crate) fn session_not_found(session_id: &str) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }
}
