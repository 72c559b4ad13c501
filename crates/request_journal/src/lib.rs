mod error;
mod journal;
mod paths;
mod reader;
mod schema;

pub use error::JournalError;
pub use journal::RequestJournal;
pub use paths::{journal_path, JOURNAL_FILE_NAME};
pub use reader::{JournalReader, JournalRecord};
pub use schema::JournalEntry;
