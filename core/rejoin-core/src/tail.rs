//! Following the client's output log as it grows.
//!
//! [`FileTail`] is a polling tailer: it yields complete lines appended after
//! a starting offset, holds back a partially written last line until its
//! newline arrives, starts over from the beginning when the file shrinks
//! (truncated or replaced), and retries opening when the file is missing.

use std::fs::Metadata;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::{RejoinError, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type KeepAlive = Box<dyn Fn() -> bool + Send>;

pub struct FileTail {
    path: PathBuf,
    reader: Option<BufReader<fs_err::File>>,
    offset: u64,
    pending: Vec<u8>,
    poll_interval: Duration,
    keep_alive: KeepAlive,
}

impl FileTail {
    /// Opens `path` and positions the tail at `offset` bytes. The file must
    /// exist now; later disappearances are retried.
    pub fn open(path: impl Into<PathBuf>, offset: u64) -> Result<Self> {
        let path = path.into();
        let mut tail = Self {
            path,
            reader: None,
            offset,
            pending: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            keep_alive: Box::new(|| true),
        };
        tail.reopen().map_err(|source| RejoinError::Io {
            context: format!("opening {}", tail.path.display()),
            source,
        })?;
        Ok(tail)
    }

    /// While no new lines are available, iteration ends as soon as
    /// `keep_alive` returns false.
    pub fn with_keep_alive(mut self, keep_alive: impl Fn() -> bool + Send + 'static) -> Self {
        self.keep_alive = Box::new(keep_alive);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen(&mut self) -> io::Result<()> {
        let mut file = fs_err::File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            info!(path = %self.path.display(), "Log shrank while closed; reading from start");
            self.offset = 0;
            self.pending.clear();
        }
        file.seek(SeekFrom::Start(self.offset))?;
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    fn check_truncation(&mut self) -> io::Result<()> {
        let len = fs_err::metadata(&self.path)?.len();
        if len < self.offset {
            info!(path = %self.path.display(), "Log truncated; reading from start");
            self.offset = 0;
            self.pending.clear();
            self.reopen()?;
        }
        Ok(())
    }

    /// Returns the next complete line, or `None` if nothing new is there yet.
    fn read_available(&mut self) -> io::Result<Option<String>> {
        if self.reader.is_none() {
            self.reopen()?;
        } else {
            self.check_truncation()?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut chunk = Vec::new();
        let read = reader.read_until(b'\n', &mut chunk)?;
        if read == 0 {
            return Ok(None);
        }
        self.offset += read as u64;
        self.pending.extend_from_slice(&chunk);

        if self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }
        self.pending.pop();
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }
}

impl Iterator for FileTail {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.read_available() {
                Ok(Some(line)) => return Some(line),
                Ok(None) => {}
                Err(err) => {
                    if self.reader.is_some() {
                        warn!(path = %self.path.display(), error = %err, "Lost log file; reconnecting");
                    }
                    self.reader = None;
                }
            }

            if !(self.keep_alive)() {
                debug!(path = %self.path.display(), "Tail released");
                return None;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Finds the most recently modified file in `dir` whose name contains `marker`.
pub fn latest_log_file(dir: &Path, marker: &str) -> Result<PathBuf> {
    let entries = fs_err::read_dir(dir).map_err(|source| RejoinError::Io {
        context: format!("listing {}", dir.display()),
        source,
    })?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().contains(marker) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = modified_time(&metadata);
        if newest.as_ref().map(|(time, _)| modified > *time).unwrap_or(true) {
            newest = Some((modified, entry.path()));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| RejoinError::LogFileNotFound(dir.to_path_buf()))
}

fn modified_time(metadata: &Metadata) -> SystemTime {
    metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}
