//! Chunked propagation.
//!
//! The model only holds a bounded window of frames. [`ChunkCursor`] stitches
//! consecutive windows into one stream of frame results: every follow-on chunk
//! starts at the last emitted frame so the model keeps one frame of temporal
//! context, and that overlap frame is dropped instead of emitted twice.
//!
//! ```text
//! AwaitingChunkInit --init ok--> StreamingChunk --frames exhausted--> AwaitingChunkInit
//!        |                             |
//!        +--end of video--> Exhausted <+--final chunk, no new frame or failure
//! ```

use log::debug;
use video_predictor::{FrameStream, InitStateRequest, PropagateRequest, VideoPredictor};

use crate::error::InferenceError;
use crate::session::{LiveChunk, Session};
use crate::types::PropagateDataResponse;

/// Smallest follow-on window: the overlap frame plus one new frame.
const MIN_FOLLOW_ON_WINDOW: usize = 2;

enum ChunkPhase {
    AwaitingChunkInit { offset: usize },
    StreamingChunk(ActiveChunk),
    Exhausted,
}

struct ActiveChunk {
    offset: usize,
    frames: FrameStream,
    is_final: bool,
    emitted: usize,
}

/// Position of one propagation call within the video.
///
/// The cursor holds no borrow of the session or predictor between steps, so it
/// can be dropped after any emitted frame and leaves the session consistent.
pub struct ChunkCursor {
    phase: ChunkPhase,
    chunk_size: usize,
    offload_video_to_cpu: bool,
    next_frame_index: usize,
    chunks_opened: usize,
}

impl ChunkCursor {
    #[must_use]
    pub fn new(start_frame_index: usize, chunk_size: usize, offload_video_to_cpu: bool) -> Self {
        Self {
            phase: ChunkPhase::AwaitingChunkInit {
                offset: start_frame_index,
            },
            chunk_size: chunk_size.max(1),
            offload_video_to_cpu,
            next_frame_index: start_frame_index,
            chunks_opened: 0,
        }
    }

    /// Global index of the next frame this cursor will emit.
    #[must_use]
    pub fn next_frame_index(&self) -> usize {
        self.next_frame_index
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.phase, ChunkPhase::Exhausted)
    }

    #[must_use]
    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            ChunkPhase::AwaitingChunkInit { .. } => "awaiting_chunk_init",
            ChunkPhase::StreamingChunk(_) => "streaming_chunk",
            ChunkPhase::Exhausted => "exhausted",
        }
    }

    /// Produces the next frame result.
    ///
    /// Returns `None` once the video ends. A model failure is returned once and
    /// leaves the cursor exhausted.
    pub fn next_frame(
        &mut self,
        session: &mut Session,
        predictor: &dyn VideoPredictor,
    ) -> Option<Result<PropagateDataResponse, InferenceError>> {
        loop {
            match std::mem::replace(&mut self.phase, ChunkPhase::Exhausted) {
                ChunkPhase::Exhausted => return None,
                ChunkPhase::AwaitingChunkInit { offset } => {
                    match self.open_chunk(session, predictor, offset) {
                        Ok(Some(chunk)) => self.phase = ChunkPhase::StreamingChunk(chunk),
                        Ok(None) => return None,
                        Err(error) => return Some(Err(error)),
                    }
                }
                ChunkPhase::StreamingChunk(mut chunk) => match chunk.frames.next() {
                    Some(Ok(frame)) => {
                        let frame_index = chunk.offset + frame.frame_index;
                        if frame_index < self.next_frame_index {
                            debug!(
                                "session {}: skipping overlap frame {frame_index} of chunk at {}",
                                session.id(),
                                chunk.offset
                            );
                            self.phase = ChunkPhase::StreamingChunk(chunk);
                            continue;
                        }
                        if frame_index > self.next_frame_index {
                            return Some(Err(InferenceError::FrameGap {
                                expected: self.next_frame_index,
                                found: frame_index,
                            }));
                        }

                        chunk.emitted += 1;
                        self.next_frame_index = frame_index + 1;
                        self.phase = ChunkPhase::StreamingChunk(chunk);
                        return Some(Ok(session.record_frame(frame_index, &frame)));
                    }
                    Some(Err(error)) => return Some(Err(error.into())),
                    None if chunk.is_final || chunk.emitted == 0 => {
                        debug!(
                            "session {}: propagation ends after frame {} (chunk at {} emitted {})",
                            session.id(),
                            self.next_frame_index.saturating_sub(1),
                            chunk.offset,
                            chunk.emitted
                        );
                        return None;
                    }
                    None => {
                        self.phase = ChunkPhase::AwaitingChunkInit {
                            offset: self.next_frame_index - 1,
                        };
                    }
                },
            }
        }
    }

    fn open_chunk(
        &mut self,
        session: &mut Session,
        predictor: &dyn VideoPredictor,
        offset: usize,
    ) -> Result<Option<ActiveChunk>, InferenceError> {
        let first = self.chunks_opened == 0;
        self.chunks_opened += 1;

        if first && session.chunk().state.covers(offset) {
            let chunk = session.chunk_mut();
            let chunk_offset = chunk.offset();
            let frames = predictor.propagate_in_video(
                &mut chunk.state,
                PropagateRequest::forward_from(offset - chunk_offset),
            )?;
            debug!(
                "session {}: propagating live chunk at {chunk_offset} from frame {offset}",
                session.id()
            );

            return Ok(Some(ActiveChunk {
                offset: chunk_offset,
                frames,
                is_final: session.chunk().reaches_end_of_video(),
                emitted: 0,
            }));
        }

        let window = if first {
            self.chunk_size
        } else {
            self.chunk_size.max(MIN_FOLLOW_ON_WINDOW)
        };
        let request = InitStateRequest {
            video_path: session.video_path().to_path_buf(),
            offload_video_to_cpu: self.offload_video_to_cpu,
            start_frame: offset,
            max_frames: Some(window),
        };
        let mut state = match predictor.init_state(request) {
            Ok(state) => state,
            Err(error) if error.is_end_of_video() => {
                debug!("session {}: {error}", session.id());
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        for (object_id, mask) in session.seed_masks() {
            predictor.add_new_mask(&mut state, 0, object_id, mask.to_array().view())?;
        }
        let frames = predictor.propagate_in_video(&mut state, PropagateRequest::forward_from(0))?;

        let chunk = LiveChunk::new(state, window);
        let is_final = chunk.reaches_end_of_video();
        session.replace_chunk(chunk);

        Ok(Some(ActiveChunk {
            offset,
            frames,
            is_final,
            emitted: 0,
        }))
    }
}
