//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event log and status record storage shared with the producer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Append-only event log.
//!
//! Records are stored one JSON document per line. Logs created by
//! [`EventLogWriter`] start with a header line that readers skip. A file whose
//! first non-blank byte is `[` is read as a whole JSON array instead, which is
//! the layout older producers rewrite on every append.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::record::EventRecord;
use crate::{PersistenceError, Result};

/// Version stamped into the header of logs created by this crate.
pub const LOG_FORMAT_VERSION: u16 = 1;

/// Event log file header stored as the first line in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl EventLogHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: LOG_FORMAT_VERSION,
            created_at,
            hash,
        }
    }
}

/// Append-only writer for the event log.
///
/// Every append is one `write_all` of a complete line on an append-mode
/// handle followed by `sync_data`, so a concurrent reader sees either the
/// whole record or an unterminated fragment it knows to ignore.
#[derive(Debug)]
pub struct EventLogWriter {
    path: PathBuf,
    file: File,
}

impl EventLogWriter {
    /// Open an event log for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            let mut line = serde_json::to_vec(&EventLogHeader::new())?;
            line.push(b'\n');
            file.write_all(&line)?;
            file.sync_data()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append a record and return the number of bytes written.
    pub fn append(&mut self, record: &EventRecord) -> Result<usize> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(line.len())
    }

    /// Access the current path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Records produced by one [`EventLogTail::poll`].
#[derive(Debug, Default)]
pub struct TailBatch {
    /// The log was replaced or truncated; previously returned records are stale.
    pub reset: bool,
    /// Newly committed records in append order.
    pub records: Vec<EventRecord>,
}

/// Incremental reader returning only records committed since the last poll.
#[derive(Debug)]
pub struct EventLogTail {
    path: PathBuf,
    offset: u64,
    lines_consumed: usize,
    fingerprint: Option<String>,
    array_stamp: Option<(u64, Option<SystemTime>)>,
}

impl EventLogTail {
    /// Create a tail positioned at the start of the log.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            lines_consumed: 0,
            fingerprint: None,
            array_stamp: None,
        }
    }

    /// Path of the followed log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget the read position so the next poll starts over.
    pub fn rewind(&mut self) {
        self.offset = 0;
        self.lines_consumed = 0;
        self.fingerprint = None;
        self.array_stamp = None;
    }

    /// Read every record committed since the previous poll.
    ///
    /// A trailing fragment without a newline is an append in flight; it is
    /// left for the next poll. On error the read position is not advanced.
    pub fn poll(&mut self) -> Result<TailBatch> {
        let file = File::open(&self.path).map_err(|source| PersistenceError::Unavailable {
            path: self.path.clone(),
            source,
        })?;
        let metadata = file.metadata()?;
        let mut reader = BufReader::new(file);

        let mut first_line = Vec::new();
        reader.read_until(b'\n', &mut first_line)?;

        if first_non_blank(&first_line) == Some(b'[') {
            return self.poll_array(reader, &metadata);
        }
        self.array_stamp = None;

        if !first_line.ends_with(b"\n") {
            // Nothing committed yet.
            let reset = self.fingerprint.is_some();
            self.rewind();
            return Ok(TailBatch {
                reset,
                records: Vec::new(),
            });
        }

        let fingerprint = hex::encode(Sha256::digest(&first_line));
        let mut reset = false;
        if self.fingerprint.as_deref() != Some(fingerprint.as_str())
            || metadata.len() < self.offset
        {
            if self.fingerprint.is_some() {
                debug!(path = %self.path.display(), "event log replaced; rereading from start");
            }
            self.rewind();
            reset = true;
        }

        reader.seek(SeekFrom::Start(self.offset))?;
        let mut pending = Vec::new();
        reader.read_to_end(&mut pending)?;
        let committed = match pending.iter().rposition(|b| *b == b'\n') {
            Some(last) => &pending[..=last],
            None => &[][..],
        };

        let mut records = Vec::new();
        let mut line_no = self.lines_consumed;
        if let Some(body) = committed.strip_suffix(b"\n") {
            for raw in body.split(|b| *b == b'\n') {
                line_no += 1;
                let line = trim_line(raw);
                if line.is_empty() {
                    continue;
                }
                if line_no == 1 && serde_json::from_slice::<EventLogHeader>(line).is_ok() {
                    continue;
                }
                let record = serde_json::from_slice::<EventRecord>(line).map_err(|err| {
                    PersistenceError::Corrupt {
                        path: self.path.clone(),
                        reason: format!("line {line_no}: {err}"),
                    }
                })?;
                records.push(record);
            }
        }

        self.offset += committed.len() as u64;
        self.lines_consumed = line_no;
        self.fingerprint = Some(fingerprint);
        Ok(TailBatch { reset, records })
    }

    fn poll_array(
        &mut self,
        mut reader: BufReader<File>,
        metadata: &fs::Metadata,
    ) -> Result<TailBatch> {
        let stamp = (metadata.len(), metadata.modified().ok());
        if self.array_stamp == Some(stamp) {
            return Ok(TailBatch::default());
        }

        reader.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;
        let records = serde_json::from_slice::<Vec<EventRecord>>(&contents).map_err(|err| {
            PersistenceError::Corrupt {
                path: self.path.clone(),
                reason: err.to_string(),
            }
        })?;

        self.rewind();
        self.array_stamp = Some(stamp);
        Ok(TailBatch {
            reset: true,
            records,
        })
    }
}

/// Read every committed record of the log in append order.
pub fn read_all(path: &Path) -> Result<Vec<EventRecord>> {
    Ok(EventLogTail::new(path).poll()?.records)
}

fn first_non_blank(bytes: &[u8]) -> Option<u8> {
    bytes.iter().copied().find(|b| !b.is_ascii_whitespace())
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &raw[start..end.max(start)]
}
