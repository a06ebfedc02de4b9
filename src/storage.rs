//! Record persistence.
//!
//! The consumer thread owns a [`Persister`] and runs [`drain`] until the
//! sample channel reports end-of-stream, then flushes and closes it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channel::RecordReceiver;
use crate::config::{OutputConfig, OutputFormat};
use crate::error::{PersistenceError, ShutdownError};
use crate::types::Record;

/// Bytes of accepted lines held back when not flushing every record
const BUFFER_LIMIT: usize = 8 * 1024;

/// Durable sink for records, driven from a single consumer thread.
///
/// A failed `append` leaves no trace of the record, so retrying it never
/// writes the row twice.
pub trait Persister: Send {
    fn append(&mut self, record: &Record) -> Result<(), PersistenceError>;

    /// Make every prior append durable before returning
    fn flush(&mut self) -> Result<(), PersistenceError>;

    fn close(&mut self) -> Result<(), PersistenceError>;
}

/// Append-only file operations the persister needs
pub trait OutputFile: Write + Send {
    fn sync_data(&self) -> io::Result<()>;

    fn sync_all(&self) -> io::Result<()>;

    /// Cut the file back to `len` bytes
    fn set_len(&self, len: u64) -> io::Result<()>;
}

impl OutputFile for File {
    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// Appends records to a CSV or JSON-lines file.
///
/// Lines are staged in an in-memory buffer and written out with a single
/// `write_all` followed by a sync. When that fails the file is cut back to
/// its last good length, so a torn write never leaves a partial row.
pub struct FilePersister<F = File> {
    path: PathBuf,
    format: OutputFormat,
    flush_every_record: bool,
    file: Option<F>,
    /// Accepted lines not yet in the file
    buffer: Vec<u8>,
    /// File length covering every completed write
    written_len: u64,
}

impl FilePersister<File> {
    /// Open `path` for appending, creating parent directories as needed.
    /// A CSV header is written when the file is new or empty.
    pub fn open(
        path: impl AsRef<Path>,
        format: OutputFormat,
        flush_every_record: bool,
    ) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source: io::Error| PersistenceError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();

        info!(path = %path.display(), ?format, "Opened output file");
        Self::with_file(file, len, path, format, flush_every_record)
    }

    pub fn from_config(config: &OutputConfig) -> Result<Self, PersistenceError> {
        Self::open(&config.path, config.format, config.flush_every_record)
    }
}

impl<F: OutputFile> FilePersister<F> {
    /// Wrap an already open file currently `len` bytes long.
    pub fn with_file(
        file: F,
        len: u64,
        path: PathBuf,
        format: OutputFormat,
        flush_every_record: bool,
    ) -> Result<Self, PersistenceError> {
        let mut persister = Self {
            path,
            format,
            flush_every_record,
            file: Some(file),
            buffer: Vec::new(),
            written_len: len,
        };
        if format == OutputFormat::Csv && len == 0 {
            persister.buffer.extend_from_slice(Record::csv_header().as_bytes());
            persister.buffer.push(b'\n');
            persister.write_out()?;
        }
        Ok(persister)
    }

    fn io_err(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io { path: self.path.clone(), source }
    }

    /// Write and sync the buffer. On failure the file is cut back to
    /// `written_len` and the buffer is kept for the next attempt.
    fn write_out(&mut self) -> Result<(), PersistenceError> {
        let file = self.file.as_mut().ok_or(PersistenceError::Closed)?;
        let written = file.write_all(&self.buffer).and_then(|_| file.sync_data());

        match written {
            Ok(()) => {
                self.written_len += self.buffer.len() as u64;
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = file.set_len(self.written_len) {
                    error!(
                        path = %self.path.display(),
                        error = %rollback,
                        "Could not truncate after failed write, file may hold a partial row"
                    );
                }
                Err(self.io_err(e))
            }
        }
    }
}

impl<F: OutputFile> Persister for FilePersister<F> {
    fn append(&mut self, record: &Record) -> Result<(), PersistenceError> {
        if self.file.is_none() {
            return Err(PersistenceError::Closed);
        }
        let line = match self.format {
            OutputFormat::Csv => record.to_csv_row(),
            OutputFormat::Jsonl => serde_json::to_string(record)?,
        };

        let mark = self.buffer.len();
        self.buffer.extend_from_slice(line.as_bytes());
        self.buffer.push(b'\n');

        if self.flush_every_record || self.buffer.len() >= BUFFER_LIMIT {
            if let Err(e) = self.write_out() {
                // Drop this record's line; earlier accepted lines stay queued.
                self.buffer.truncate(mark);
                return Err(e);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        self.write_out()
    }

    fn close(&mut self) -> Result<(), PersistenceError> {
        if self.file.is_none() {
            return Ok(());
        }
        self.write_out()?;
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| self.io_err(e))?;
        }
        debug!(path = %self.path.display(), "Output file closed");
        Ok(())
    }
}

/// How many times a failed append is retried and how long to wait between
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            retries: config.append_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 3, backoff: Duration::from_millis(50) }
    }
}

/// Outcome of a completed drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub persisted: u64,
    pub lost: u64,
}

/// Persist every record until end-of-stream, then flush and close.
///
/// Blocks the calling thread. Append failures are retried per `retry`; a
/// record that still cannot be written is counted as lost and logged as a
/// data-loss event. Lost records, or a failing flush or close, turn the
/// result into a [`ShutdownError`].
pub fn drain<P: Persister>(
    rx: &mut RecordReceiver,
    persister: &mut P,
    retry: RetryPolicy,
) -> Result<DrainReport, ShutdownError> {
    let mut report = DrainReport::default();

    while let Some(record) = rx.pop() {
        match append_with_retry(persister, &record, retry) {
            Ok(()) => report.persisted += 1,
            Err(e) => {
                report.lost += 1;
                error!(
                    timestamp = record.timestamp,
                    state = %record.state,
                    error = %e,
                    lost_total = report.lost,
                    "Record lost: persistence failed after retries"
                );
            }
        }
    }

    info!(persisted = report.persisted, "Sample stream ended, flushing output");
    persister.flush().map_err(ShutdownError::Flush)?;
    persister.close().map_err(ShutdownError::Close)?;

    if report.lost > 0 {
        return Err(ShutdownError::RecordsLost { lost: report.lost });
    }
    Ok(report)
}

fn append_with_retry<P: Persister>(
    persister: &mut P,
    record: &Record,
    retry: RetryPolicy,
) -> Result<(), PersistenceError> {
    let mut attempt = 0;
    loop {
        match persister.append(record) {
            Ok(()) => return Ok(()),
            Err(PersistenceError::Closed) => return Err(PersistenceError::Closed),
            Err(e) if attempt < retry.retries => {
                attempt += 1;
                warn!(attempt, error = %e, "Append failed, retrying");
                thread::sleep(retry.backoff);
            }
            Err(e) => return Err(e),
        }
    }
}
