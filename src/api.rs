//! Session store: the public operations of the inference service.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use request_journal::{JournalEntry, RequestJournal};
use uuid::Uuid;
use video_predictor::{InitStateRequest, PointPrompt, VideoPredictor};

use crate::config::InferenceConfig;
use crate::engine::ChunkCursor;
use crate::error::InferenceError;
use crate::session::{binary_masks, frame_response, LiveChunk, Session, SessionSnapshot};
use crate::types::{
    AddMaskRequest, AddPointsRequest, ClearPointsInFrameRequest, ClearPointsInVideoRequest,
    ClearPointsInVideoResponse, CloseSessionRequest, CloseSessionResponse, Operation,
    PropagateDataResponse, PropagateInVideoRequest, RemoveObjectRequest, RemoveObjectResponse,
    StartSessionRequest, StartSessionResponse,
};

type SessionHandle = Arc<Mutex<Session>>;
type SessionGuard = ArcMutexGuard<RawMutex, Session>;

/// Owns every live session and dispatches operations to them.
///
/// Sessions progress independently; calls against one session are serialized by
/// that session's lock, which a [`PropagationStream`] holds until it is dropped.
/// Calls are journaled once they hold that lock, so the journal lists them in the
/// order they ran.
pub struct InferenceApi {
    predictor: Arc<dyn VideoPredictor>,
    config: InferenceConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    journal: Option<RequestJournal>,
    recording: AtomicBool,
}

impl InferenceApi {
    /// Creates a store without a journal.
    pub fn new(predictor: Arc<dyn VideoPredictor>, config: InferenceConfig) -> Self {
        let recording = AtomicBool::new(config.record_requests);
        Self {
            predictor,
            config,
            sessions: RwLock::new(HashMap::new()),
            journal: None,
            recording,
        }
    }

    /// Creates a store, opening the journal under the data path when recording is enabled.
    pub fn from_config(
        predictor: Arc<dyn VideoPredictor>,
        config: InferenceConfig,
    ) -> Result<Self, InferenceError> {
        if !config.record_requests {
            return Ok(Self::new(predictor, config));
        }

        let journal = RequestJournal::open(&config.journal_path())?;
        info!("recording requests to {}", journal.path().display());
        Ok(Self::new(predictor, config).with_journal(journal))
    }

    /// Journals every mutating call to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: RequestJournal) -> Self {
        self.journal = Some(journal);
        self.recording = AtomicBool::new(true);
        self
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    #[must_use]
    pub fn predictor(&self) -> &Arc<dyn VideoPredictor> {
        &self.predictor
    }

    #[must_use]
    pub fn journal(&self) -> Option<&RequestJournal> {
        self.journal.as_ref()
    }

    /// True when calls made now would be journaled.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.journal.is_some() && self.recording.load(Ordering::SeqCst)
    }

    /// Stops journaling until the returned guard is dropped.
    ///
    /// The previous setting is restored on drop, including during unwinding.
    pub fn suspend_recording(&self) -> RecordingGuard<'_> {
        RecordingGuard {
            previous: self.recording.swap(false, Ordering::SeqCst),
            recording: &self.recording,
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_snapshot(&self, session_id: &str) -> Result<SessionSnapshot, InferenceError> {
        let session = self.session(session_id)?;
        let session = session.lock();
        Ok(SessionSnapshot::from(&*session))
    }

    pub fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartSessionResponse, InferenceError> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let request = StartSessionRequest {
            session_id: Some(session_id.clone()),
            ..request
        };

        {
            let sessions = self.sessions.read();
            if sessions.contains_key(&session_id) {
                self.record(&request)?;
                return Err(InferenceError::SessionAlreadyExists { session_id });
            }
        }

        let video_path = PathBuf::from(&request.path);
        let chunk_size = self.config.chunk_size;
        let initialized = self.predictor.init_state(InitStateRequest {
            video_path: video_path.clone(),
            offload_video_to_cpu: self.config.offload_video_to_cpu,
            start_frame: 0,
            max_frames: Some(chunk_size),
        });
        let state = match initialized {
            Ok(state) => state,
            Err(error) => {
                self.record(&request)?;
                if error.is_end_of_video() {
                    return Err(InferenceError::EmptyVideo { path: video_path });
                }
                return Err(error.into());
            }
        };
        let session = Session::new(
            session_id.clone(),
            video_path,
            LiveChunk::new(state, chunk_size),
        );

        let live_sessions = {
            let mut sessions = self.sessions.write();
            self.record(&request)?;
            match sessions.entry(session_id.clone()) {
                Entry::Occupied(_) => {
                    return Err(InferenceError::SessionAlreadyExists { session_id });
                }
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Mutex::new(session)));
                }
            }
            sessions.len()
        };
        info!(
            "started session {session_id} for {}; {live_sessions} live sessions",
            request.path
        );

        Ok(StartSessionResponse { session_id })
    }

    pub fn add_points(
        &self,
        request: AddPointsRequest,
    ) -> Result<PropagateDataResponse, InferenceError> {
        let mut session = self.lock_session(&request.session_id, &request)?;
        if request.points.len() != request.labels.len() {
            return Err(InferenceError::InvalidRequest(format!(
                "got {} points but {} labels",
                request.points.len(),
                request.labels.len()
            )));
        }

        let local_frame = self.load_chunk_for(&mut session, request.frame_index)?;
        let frame = self.predictor.add_new_points_or_box(
            &mut session.chunk_mut().state,
            PointPrompt {
                frame_index: local_frame,
                object_id: request.object_id,
                points: request.points,
                labels: request.labels,
                clear_old_points: request.clear_old_points,
                normalize_coords: false,
            },
        )?;

        Ok(session.record_frame(request.frame_index, &frame))
    }

    pub fn add_mask(
        &self,
        request: AddMaskRequest,
    ) -> Result<PropagateDataResponse, InferenceError> {
        let mut session = self.lock_session(&request.session_id, &request)?;
        let [height, width] = request.mask.size();
        if (height, width) != session.video_size() {
            return Err(InferenceError::InvalidRequest(format!(
                "mask size {:?} does not match video size {:?}",
                (height, width),
                session.video_size()
            )));
        }
        let mask = request.mask.decode()?;

        let local_frame = self.load_chunk_for(&mut session, request.frame_index)?;
        let frame = self.predictor.add_new_mask(
            &mut session.chunk_mut().state,
            local_frame,
            request.object_id,
            mask.to_array().view(),
        )?;

        Ok(session.record_frame(request.frame_index, &frame))
    }

    pub fn clear_points_in_frame(
        &self,
        request: ClearPointsInFrameRequest,
    ) -> Result<PropagateDataResponse, InferenceError> {
        let mut session = self.lock_session(&request.session_id, &request)?;
        let local_frame = self.load_chunk_for(&mut session, request.frame_index)?;
        let frame = self.predictor.clear_all_prompts_in_frame(
            &mut session.chunk_mut().state,
            local_frame,
            request.object_id,
        )?;

        Ok(session.record_frame(request.frame_index, &frame))
    }

    pub fn clear_points_in_video(
        &self,
        request: ClearPointsInVideoRequest,
    ) -> Result<ClearPointsInVideoResponse, InferenceError> {
        let mut session = self.lock_session(&request.session_id, &request)?;
        self.predictor.reset_state(&mut session.chunk_mut().state)?;
        session.forget_all_objects();
        debug!("session {}: cleared all prompts", request.session_id);

        Ok(ClearPointsInVideoResponse { success: true })
    }

    pub fn remove_object(
        &self,
        request: RemoveObjectRequest,
    ) -> Result<RemoveObjectResponse, InferenceError> {
        let mut session = self.lock_session(&request.session_id, &request)?;
        let offset = session.chunk_offset();
        let frames = self
            .predictor
            .remove_object(&mut session.chunk_mut().state, request.object_id)?;
        session.forget_object(request.object_id);

        Ok(RemoveObjectResponse {
            results: frames
                .iter()
                .map(|frame| frame_response(offset + frame.frame_index, &binary_masks(frame)))
                .collect(),
        })
    }

    /// Starts propagating masks from `start_frame_index` to the end of the video.
    ///
    /// Frames are produced lazily as the stream is iterated. The stream holds the
    /// session's lock, so other calls on the same session wait until it is dropped.
    pub fn propagate_in_video(
        &self,
        request: PropagateInVideoRequest,
    ) -> Result<PropagationStream, InferenceError> {
        let session = self.lock_session(&request.session_id, &request)?;
        debug!(
            "session {}: propagating from frame {} in chunks of {}",
            request.session_id, request.start_frame_index, self.config.chunk_size
        );

        Ok(PropagationStream {
            session,
            predictor: Arc::clone(&self.predictor),
            cursor: ChunkCursor::new(
                request.start_frame_index,
                self.config.chunk_size,
                self.config.offload_video_to_cpu,
            ),
        })
    }

    pub fn close_session(
        &self,
        request: CloseSessionRequest,
    ) -> Result<CloseSessionResponse, InferenceError> {
        let (removed, live_sessions) = {
            let mut sessions = self.sessions.write();
            self.record(&request)?;
            let removed = sessions.remove(&request.session_id);
            (removed, sessions.len())
        };
        if removed.is_none() {
            warn!(
                "cannot close session {}; it may have already been closed",
                request.session_id
            );
            return Ok(CloseSessionResponse { success: false });
        }

        info!(
            "closed session {}; {live_sessions} live sessions",
            request.session_id
        );
        Ok(CloseSessionResponse { success: true })
    }

    fn session(&self, session_id: &str) -> Result<SessionHandle, InferenceError> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| InferenceError::session_not_found(session_id))
    }

    /// Locks the session and journals `request` while it is held.
    ///
    /// Journaling under the session lock, and under the session map's lock, keeps
    /// journal order equal to the order calls take effect. A call against a missing
    /// or closed session is journaled too before it fails.
    fn lock_session<R: Operation>(
        &self,
        session_id: &str,
        request: &R,
    ) -> Result<SessionGuard, InferenceError> {
        let handle = self.sessions.read().get(session_id).cloned();
        let session = handle.as_ref().map(|handle| handle.lock_arc());

        let sessions = self.sessions.read();
        self.record(request)?;
        let still_live = match (&handle, sessions.get(session_id)) {
            (Some(handle), Some(live)) => Arc::ptr_eq(handle, live),
            _ => false,
        };
        match session {
            Some(session) if still_live => Ok(session),
            _ => Err(InferenceError::session_not_found(session_id)),
        }
    }

    fn load_chunk_for(
        &self,
        session: &mut Session,
        frame_index: usize,
    ) -> Result<usize, InferenceError> {
        session.load_chunk_for(
            self.predictor.as_ref(),
            frame_index,
            self.config.chunk_size,
            self.config.offload_video_to_cpu,
        )
    }

    fn record<R: Operation>(&self, request: &R) -> Result<(), InferenceError> {
        if !self.is_recording() {
            return Ok(());
        }
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let request_type = R::REQUEST_TYPE;
        let request_data =
            serde_json::to_value(request).map_err(|source| InferenceError::RequestSerialize {
                request_type: request_type.tag().to_string(),
                source,
            })?;
        journal.append(&JournalEntry::new(
            request_type.method(),
            request_type.tag(),
            request_data,
        ))?;

        Ok(())
    }
}

/// Restores the journaling setting of an [`InferenceApi`] when dropped.
#[must_use = "recording resumes as soon as the guard is dropped"]
pub struct RecordingGuard<'a> {
    recording: &'a AtomicBool,
    previous: bool,
}

impl Drop for RecordingGuard<'_> {
    fn drop(&mut self) {
        self.recording.store(self.previous, Ordering::SeqCst);
    }
}

/// Lazy, gap-free sequence of frame results for one session.
pub struct PropagationStream {
    session: SessionGuard,
    predictor: Arc<dyn VideoPredictor>,
    cursor: ChunkCursor,
}

impl PropagationStream {
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Global index of the next frame the stream will yield.
    #[must_use]
    pub fn next_frame_index(&self) -> usize {
        self.cursor.next_frame_index()
    }
}

impl Iterator for PropagationStream {
    type Item = Result<PropagateDataResponse, InferenceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor
            .next_frame(&mut self.session, self.predictor.as_ref())
    }
}
