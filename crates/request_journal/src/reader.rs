use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::JournalError;
use crate::schema::JournalEntry;

/// One non-blank journal line. A line that does not parse keeps its raw text so
/// callers can report it and move on.
#[derive(Debug)]
pub struct JournalRecord {
    pub line: usize,
    /// Line content; invalid UTF-8 is replaced lossily.
    pub raw: String,
    pub entry: Result<JournalEntry, JournalError>,
}

/// Reads a journal top to bottom, one record per line.
///
/// Iteration yields `Err` only for I/O failures; malformed lines, including
/// lines that are not UTF-8, are reported through [`JournalRecord::entry`].
#[derive(Debug)]
pub struct JournalReader {
    path: PathBuf,
    reader: BufReader<File>,
    line_number: usize,
    buffer: Vec<u8>,
}

impl JournalReader {
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let path = path.to_path_buf();
        let file = File::open(&path).map_err(|source| JournalError::io("opening", &path, source))?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            line_number: 0,
            buffer: Vec::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalRecord, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => self.line_number += 1,
                Err(source) => {
                    self.line_number += 1;
                    return Some(Err(JournalError::io_line(
                        &self.path,
                        self.line_number,
                        source,
                    )));
                }
            }

            let bytes = trim_line_ending(&self.buffer);
            let (raw, entry) = match std::str::from_utf8(bytes) {
                Ok(raw) => {
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let entry = parse_json_line(&self.path, self.line_number, raw);
                    (raw.to_string(), entry)
                }
                Err(source) => (
                    String::from_utf8_lossy(bytes).into_owned(),
                    Err(JournalError::utf8_line(&self.path, self.line_number, source)),
                ),
            };

            return Some(Ok(JournalRecord {
                line: self.line_number,
                raw,
                entry,
            }));
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JournalEntry, JournalError> {
    serde_json::from_str::<JournalEntry>(line)
        .map_err(|source| JournalError::json_line(path, line_number, source))
}
