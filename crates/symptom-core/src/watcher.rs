//! Keyword log watchers.
//!
//! A [`LogWatcher`] polls one path at a fixed interval. For a regular file
//! it reads what was appended since the previous poll and emits one
//! [`ErrorEvent`] per complete line containing a configured keyword. For a
//! directory (a core-dump store) every entry that appears is an event.
//!
//! Missing or unreadable paths are not fatal: the watcher records a
//! warning when it enters that condition and keeps polling.

use std::collections::BTreeSet;
use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregator::EventSink;
use crate::barrier::{StopListener, TaskStatus};
use crate::domain::{ErrorEvent, SessionWarning, TaskOutcome, WatchError};

/// Upper bound on bytes read from one file in a single poll.
const MAX_READ_PER_POLL: u64 = 1024 * 1024;

/// Case-sensitive substring matcher over a fixed keyword set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().filter(|k| !k.is_empty()).collect(),
        }
    }

    /// First keyword contained in `line`, if any.
    pub fn find(&self, line: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|k| line.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.find(line).is_some()
    }
}

/// Device and inode of a watched file.
type FileId = (u64, u64);

#[cfg(unix)]
fn file_id(meta: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> Option<FileId> {
    None
}

/// Read position within the watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    /// Not seen yet, or gone since the last poll. Whatever appears is new.
    Absent,
    File { offset: u64, id: Option<FileId> },
    Dir { seen: BTreeSet<String> },
}

impl Cursor {
    async fn baseline(path: &Path) -> Self {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Cursor::Dir {
                seen: list_dir(path).await.unwrap_or_default(),
            },
            Ok(meta) => Cursor::File {
                offset: meta.len(),
                id: file_id(&meta),
            },
            Err(_) => Cursor::Absent,
        }
    }
}

async fn list_dir(path: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Polls a single path for keyword matches.
///
/// A watcher is consumed by [`LogWatcher::run`]; to watch again, build a
/// new one.
#[derive(Debug)]
pub struct LogWatcher {
    path: PathBuf,
    source: String,
    matcher: Arc<KeywordMatcher>,
    interval: Duration,
    cursor: Cursor,
    condition: Option<WatchError>,
}

impl LogWatcher {
    /// Create a watcher. The current end of the path is the baseline:
    /// only content appended afterwards is inspected.
    pub async fn new(
        path: impl Into<PathBuf>,
        matcher: Arc<KeywordMatcher>,
        interval: Duration,
    ) -> Self {
        let path = path.into();
        let cursor = Cursor::baseline(&path).await;
        Self {
            source: path.display().to_string(),
            path,
            matcher,
            interval,
            cursor,
            condition: None,
        }
    }

    /// Source identifier attached to emitted events.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Inspect the path once and return the messages to emit.
    pub async fn poll(&mut self) -> Result<Vec<String>, WatchError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cursor = Cursor::Absent;
                return Err(WatchError::Missing {
                    path: self.source.clone(),
                });
            }
            Err(e) => return Err(self.unreadable(&e)),
        };

        if meta.is_dir() {
            self.poll_dir().await
        } else {
            self.poll_file(&meta).await
        }
    }

    async fn poll_dir(&mut self) -> Result<Vec<String>, WatchError> {
        let current = list_dir(&self.path)
            .await
            .map_err(|e| self.unreadable(&e))?;

        let previous = match std::mem::replace(&mut self.cursor, Cursor::Absent) {
            Cursor::Dir { seen } => seen,
            _ => BTreeSet::new(),
        };
        let messages = current
            .difference(&previous)
            .map(|name| format!("new entry {}", name))
            .collect();
        self.cursor = Cursor::Dir { seen: current };
        Ok(messages)
    }

    async fn poll_file(&mut self, meta: &Metadata) -> Result<Vec<String>, WatchError> {
        let len = meta.len();
        let id = file_id(meta);
        let mut offset = match &self.cursor {
            Cursor::File { offset, id: seen } if *seen == id => *offset,
            Cursor::File { .. } => {
                debug!(path = %self.source, "file replaced, reading from start");
                0
            }
            _ => 0,
        };
        if len < offset {
            debug!(path = %self.source, offset, len, "file truncated, rereading from start");
            offset = 0;
        }
        self.cursor = Cursor::File { offset, id };
        if len == offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| self.unreadable(&e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| self.unreadable(&e))?;

        let want = (len - offset).min(MAX_READ_PER_POLL);
        let mut chunk = Vec::with_capacity(want as usize);
        file.take(want)
            .read_to_end(&mut chunk)
            .await
            .map_err(|e| self.unreadable(&e))?;

        // Only complete lines are consumed; a trailing fragment waits for
        // the next poll unless it alone fills the read window.
        let consumed = match chunk.iter().rposition(|b| *b == b'\n') {
            Some(idx) => idx + 1,
            None if chunk.len() as u64 == MAX_READ_PER_POLL => chunk.len(),
            None => 0,
        };
        self.cursor = Cursor::File {
            offset: offset + consumed as u64,
            id,
        };

        let messages = String::from_utf8_lossy(&chunk[..consumed])
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| self.matcher.is_match(line))
            .map(str::to_string)
            .collect();
        Ok(messages)
    }

    fn unreadable(&self, err: &std::io::Error) -> WatchError {
        WatchError::Unreadable {
            path: self.source.clone(),
            reason: err.to_string(),
        }
    }

    /// Record `err` if it is a new condition. Returns whether it was.
    fn enter_condition(&mut self, err: WatchError) -> bool {
        let is_new = match &self.condition {
            Some(current) => std::mem::discriminant(current) != std::mem::discriminant(&err),
            None => true,
        };
        self.condition = Some(err);
        is_new
    }

    /// Poll until the stop signal fires, sending matches to `sink`.
    ///
    /// Events detected in a poll are all sent before the watcher checks
    /// for stop again; once it reports `Stopping` it never sends.
    pub async fn run(
        mut self,
        mut stop: StopListener,
        sink: EventSink,
        status: TaskStatus,
    ) -> TaskOutcome {
        let mut outcome = TaskOutcome::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status.running();
        debug!(path = %self.source, interval_ms = self.interval.as_millis() as u64, "watcher running");

        'poll: loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {}
            }

            match self.poll().await {
                Ok(messages) => {
                    if self.condition.take().is_some() {
                        info!(path = %self.source, "watched path available again");
                    }
                    for message in messages {
                        if let Err(e) = sink.emit(ErrorEvent::new(&self.source, &message)).await {
                            warn!(path = %self.source, error = %e, "dropping watcher output");
                            break 'poll;
                        }
                        outcome.emitted += 1;
                    }
                }
                Err(err) => {
                    if self.enter_condition(err.clone()) {
                        warn!(path = %self.source, error = %err, "watched path not readable");
                        outcome.warnings.push(SessionWarning::from_watch(&err));
                    }
                }
            }
        }

        status.stopping();
        drop(sink);
        debug!(path = %self.source, emitted = outcome.emitted, "watcher stopped");
        outcome
    }
}
