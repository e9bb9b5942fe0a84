//! Log Tailer
//!
//! Follows an append-only log file and hands out the bytes added since the
//! previous read. A [`LogStream`] is pull-based: nothing runs unless the caller
//! awaits [`LogStream::next_chunk`], and dropping the stream is the only cleanup
//! there is.
//!
//! Chunks never split a UTF-8 sequence: trailing bytes of an incomplete
//! character stay unread until the rest arrives. The concatenation of every
//! chunk a stream yields equals the file content when the stream ends.

use mirrorflow_protocol::OperationStatus;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

/// Largest delta handed out in one chunk.
const MAX_CHUNK_BYTES: u64 = 1024 * 1024;

/// A delta of the log and where it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    pub offset: u64,
    pub data: String,
}

/// A log file that can be read whole or followed.
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
    poll_interval: Duration,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Follow from the beginning of the file.
    ///
    /// With a status receiver the stream ends after a final drain once the
    /// status is terminal (or its sender is gone). Without one it follows until
    /// dropped.
    pub fn stream(&self, status: Option<watch::Receiver<OperationStatus>>) -> LogStream {
        LogStream {
            path: self.path.clone(),
            poll_interval: self.poll_interval,
            offset: 0,
            status,
            finished: false,
        }
    }

    /// Whole file, lossily decoded. A missing file reads as empty.
    pub async fn read_full(&self) -> std::io::Result<String> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}

pub struct LogStream {
    path: PathBuf,
    poll_interval: Duration,
    offset: u64,
    status: Option<watch::Receiver<OperationStatus>>,
    finished: bool,
}

impl LogStream {
    /// Bytes delivered so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn source_done(&self) -> bool {
        match &self.status {
            Some(rx) => rx.borrow().is_terminal() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Read whatever was appended since the last chunk, without waiting.
    ///
    /// With `flush` set, an incomplete trailing UTF-8 sequence is delivered
    /// lossily instead of being held back.
    pub async fn poll_once(&mut self, flush: bool) -> std::io::Result<Option<LogChunk>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if len <= self.offset {
            return Ok(None);
        }

        let want = (len - self.offset).min(MAX_CHUNK_BYTES);
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut buf).await?;
        if buf.is_empty() {
            return Ok(None);
        }

        let decoded = std::str::from_utf8(&buf).map(str::to_string);
        let data = match decoded {
            Ok(text) => text,
            Err(e) if e.error_len().is_none() && !flush => {
                // Incomplete sequence at the end: keep it for the next read.
                buf.truncate(e.valid_up_to());
                if buf.is_empty() {
                    return Ok(None);
                }
                String::from_utf8_lossy(&buf).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&buf).into_owned(),
        };

        let chunk = LogChunk {
            offset: self.offset,
            data,
        };
        self.offset += buf.len() as u64;
        Ok(Some(chunk))
    }

    /// Next delta, waiting for the file to grow. `None` once the followed
    /// operation has finished and everything it wrote was delivered.
    pub async fn next_chunk(&mut self) -> Option<std::io::Result<LogChunk>> {
        loop {
            if self.finished {
                return None;
            }

            // Sample before reading so the drain after a terminal status sees
            // everything written before it.
            let done = self.source_done();
            match self.poll_once(done).await {
                Ok(Some(chunk)) => return Some(Ok(chunk)),
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
            if done {
                self.finished = true;
                return None;
            }

            match self.status.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = rx.changed() => {}
                    }
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}
