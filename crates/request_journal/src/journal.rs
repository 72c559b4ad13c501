use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::JournalError;
use crate::schema::JournalEntry;

/// Append-only journal file. Each entry is one JSON line, durably synced before
/// [`RequestJournal::append`] returns.
#[derive(Debug)]
pub struct RequestJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl RequestJournal {
    /// Opens the journal for append, creating it and its parent directories if needed.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| JournalError::io("creating directory", parent, source))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| JournalError::io("opening for append", &path, source))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|source| JournalError::json_serialize(&self.path, source))?;
        line.push('\n');

        let mut file = lock_unpoisoned(&self.file);
        file.write_all(line.as_bytes())
            .map_err(|source| JournalError::io("appending an entry to", &self.path, source))?;
        file.flush()
            .map_err(|source| JournalError::io("flushing", &self.path, source))?;
        file.sync_data()
            .map_err(|source| JournalError::io("syncing", &self.path, source))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
