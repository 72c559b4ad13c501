//! Replays a request journal against a session store.
//!
//! Records are replayed in file order. A record that cannot be replayed is
//! logged with its line and skipped; the rest of the journal still runs.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::{error, info, warn};
use once_cell::sync::Lazy;
use request_journal::{JournalEntry, JournalError, JournalReader, JournalRecord};

use crate::api::InferenceApi;
use crate::error::InferenceError;
use crate::types::{
    ClearPointsInVideoResponse, CloseSessionResponse, PropagateDataResponse, RemoveObjectResponse,
    Request, RequestType, StartSessionResponse,
};

/// Outcome of one replayed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutput {
    Session(StartSessionResponse),
    Frame(PropagateDataResponse),
    ClearedVideo(ClearPointsInVideoResponse),
    RemovedObject(RemoveObjectResponse),
    Closed(CloseSessionResponse),
    /// A propagation stream that was drained to its end.
    Propagated { frames: usize },
}

impl fmt::Display for ReplayOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(response) => write!(f, "session {}", response.session_id),
            Self::Frame(response) => write!(
                f,
                "frame {} with {} objects",
                response.frame_index,
                response.results.len()
            ),
            Self::ClearedVideo(response) => write!(f, "cleared video: {}", response.success),
            Self::RemovedObject(response) => {
                write!(f, "{} frames re-rendered", response.results.len())
            }
            Self::Closed(response) => write!(f, "closed: {}", response.success),
            Self::Propagated { frames } => write!(f, "{frames} frames propagated"),
        }
    }
}

/// Counts of what a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Records with an unknown request type.
    pub skipped: usize,
    /// Malformed records and calls that returned an error.
    pub failed: usize,
    pub frames_propagated: usize,
}

pub type Handler = fn(&InferenceApi, Request) -> Result<ReplayOutput, InferenceError>;

static HANDLERS: Lazy<HashMap<&'static str, (RequestType, Handler)>> = Lazy::new(|| {
    let handlers: [(RequestType, Handler); 8] = [
        (RequestType::StartSession, replay_start_session),
        (RequestType::AddPoints, replay_add_points),
        (RequestType::AddMask, replay_add_mask),
        (RequestType::ClearPointsInFrame, replay_clear_points_in_frame),
        (RequestType::ClearPointsInVideo, replay_clear_points_in_video),
        (RequestType::RemoveObject, replay_remove_object),
        (RequestType::PropagateInVideo, replay_propagate_in_video),
        (RequestType::CloseSession, replay_close_session),
    ];

    handlers
        .into_iter()
        .map(|(request_type, handler)| (request_type.method(), (request_type, handler)))
        .collect()
});

/// Looks up the handler for an operation name.
#[must_use]
pub fn handler_for(method: &str) -> Option<(RequestType, Handler)> {
    HANDLERS.get(method).copied()
}

/// Replays every record of the journal at `path` against `api`.
///
/// Journaling on `api` is suspended for the duration of the replay. Fails only
/// when the journal cannot be opened or read.
pub fn replay_requests(api: &InferenceApi, path: &Path) -> Result<ReplayReport, InferenceError> {
    let _recording = api.suspend_recording();
    let reader = JournalReader::open(path)?;
    info!("replaying requests from {}", path.display());

    let mut report = ReplayReport::default();
    for record in reader {
        let JournalRecord { line, raw, entry } = record?;
        match replay_entry(api, entry) {
            Ok(Some(output)) => {
                info!("line {line}: {output}");
                report.replayed += 1;
                if let ReplayOutput::Propagated { frames } = output {
                    report.frames_propagated += frames;
                }
            }
            Ok(None) => report.skipped += 1,
            Err(error) => {
                error!("error replaying line {line}: {error}");
                error!("line content: {raw}");
                report.failed += 1;
            }
        }
    }

    info!(
        "replay finished: {} replayed, {} skipped, {} failed, {} frames propagated",
        report.replayed, report.skipped, report.failed, report.frames_propagated
    );
    Ok(report)
}

fn replay_entry(
    api: &InferenceApi,
    entry: Result<JournalEntry, JournalError>,
) -> Result<Option<ReplayOutput>, InferenceError> {
    let entry = entry?;
    info!("replaying {} ({})", entry.method, entry.request_type);

    let Some(request_type) = RequestType::from_tag(&entry.request_type) else {
        warn!("unknown request type {}; skipping", entry.request_type);
        return Ok(None);
    };
    let (expected, handler) =
        handler_for(&entry.method).ok_or_else(|| InferenceError::UnknownMethod {
            method: entry.method.clone(),
        })?;
    if expected != request_type {
        return Err(InferenceError::RequestTypeMismatch {
            method: entry.method,
            request_type: entry.request_type,
        });
    }

    let request = Request::decode(request_type, entry.request_data)?;
    handler(api, request).map(Some)
}

fn mismatch(method: RequestType, request: &Request) -> InferenceError {
    InferenceError::RequestTypeMismatch {
        method: method.method().to_string(),
        request_type: request.request_type().tag().to_string(),
    }
}

fn replay_start_session(
    api: &InferenceApi,
    request: Request,
) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::StartSession(request) => api.start_session(request).map(ReplayOutput::Session),
        other => Err(mismatch(RequestType::StartSession, &other)),
    }
}

fn replay_add_points(api: &InferenceApi, request: Request) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::AddPoints(request) => api.add_points(request).map(ReplayOutput::Frame),
        other => Err(mismatch(RequestType::AddPoints, &other)),
    }
}

fn replay_add_mask(api: &InferenceApi, request: Request) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::AddMask(request) => api.add_mask(request).map(ReplayOutput::Frame),
        other => Err(mismatch(RequestType::AddMask, &other)),
    }
}

fn replay_clear_points_in_frame(
    api: &InferenceApi,
    request: Request,
) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::ClearPointsInFrame(request) => {
            api.clear_points_in_frame(request).map(ReplayOutput::Frame)
        }
        other => Err(mismatch(RequestType::ClearPointsInFrame, &other)),
    }
}

fn replay_clear_points_in_video(
    api: &InferenceApi,
    request: Request,
) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::ClearPointsInVideo(request) => api
            .clear_points_in_video(request)
            .map(ReplayOutput::ClearedVideo),
        other => Err(mismatch(RequestType::ClearPointsInVideo, &other)),
    }
}

fn replay_remove_object(
    api: &InferenceApi,
    request: Request,
) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::RemoveObject(request) => api
            .remove_object(request)
            .map(ReplayOutput::RemovedObject),
        other => Err(mismatch(RequestType::RemoveObject, &other)),
    }
}

/// Drains the stream so later records see the session as the live call left it.
fn replay_propagate_in_video(
    api: &InferenceApi,
    request: Request,
) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::PropagateInVideo(request) => {
            let mut frames = 0;
            for frame in api.propagate_in_video(request)? {
                frame?;
                frames += 1;
            }
            Ok(ReplayOutput::Propagated { frames })
        }
        other => Err(mismatch(RequestType::PropagateInVideo, &other)),
    }
}

fn replay_close_session(
    api: &InferenceApi,
    request: Request,
) -> Result<ReplayOutput, InferenceError> {
    match request {
        Request::CloseSession(request) => api.close_session(request).map(ReplayOutput::Closed),
        other => Err(mismatch(RequestType::CloseSession, &other)),
    }
}
