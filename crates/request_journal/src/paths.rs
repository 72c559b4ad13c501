use std::path::{Path, PathBuf};

pub const JOURNAL_FILE_NAME: &str = "api_requests.jsonl";

#[must_use]
pub fn journal_path(data_root: &Path) -> PathBuf {
    data_root.join(JOURNAL_FILE_NAME)
}
