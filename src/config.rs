//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use request_journal::journal_path;

pub const CHUNK_SIZE_ENV: &str = "INFERENCE_CHUNK_SIZE";
pub const DATA_PATH_ENV: &str = "INFERENCE_DATA_PATH";
pub const RECORD_REQUESTS_ENV: &str = "INFERENCE_RECORD_REQUESTS";
pub const OFFLOAD_VIDEO_TO_CPU_ENV: &str = "INFERENCE_OFFLOAD_VIDEO_TO_CPU";

pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_DATA_PATH: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    /// Frames loaded into the model per chunk. Always at least 1.
    pub chunk_size: usize,
    /// Root directory for the request journal.
    pub data_path: PathBuf,
    pub record_requests: bool,
    /// Device hint handed to the predictor when a chunk is loaded.
    pub offload_video_to_cpu: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            record_requests: false,
            offload_video_to_cpu: false,
        }
    }
}

impl InferenceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: env_parse_opt::<usize>(CHUNK_SIZE_ENV)
                .filter(|chunk_size| *chunk_size > 0)
                .unwrap_or(defaults.chunk_size),
            data_path: env_string_opt(DATA_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            record_requests: env_flag(RECORD_REQUESTS_ENV),
            offload_video_to_cpu: env_flag(OFFLOAD_VIDEO_TO_CPU_ENV),
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_data_path(mut self, data_path: impl Into<PathBuf>) -> Self {
        self.data_path = data_path.into();
        self
    }

    #[must_use]
    pub fn with_record_requests(mut self, record_requests: bool) -> Self {
        self.record_requests = record_requests;
        self
    }

    #[must_use]
    pub fn with_offload_video_to_cpu(mut self, offload_video_to_cpu: bool) -> Self {
        self.offload_video_to_cpu = offload_video_to_cpu;
        self
    }

    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        journal_path(&self.data_path)
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

/// Non-blank value of `key`.
fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Value of `key` parsed as `T`; unset, blank and unparsable values are all `None`.
fn env_parse_opt<T: FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}
