//! Incremental transcript monitor
//!
//! The monitor periodically asks an [`ActiveSessions`] source which sessions
//! are live, reads only what each transcript gained since the last pass, and
//! hands the new entries to an [`EntrySink`].
//!
//! ## Offsets
//!
//! Progress is kept per session in an [`OffsetTracker`]:
//!
//! - **Claude / Codex**: byte position after the last record whose entries
//!   were stored.
//! - **OpenCode**: number of assembled messages already forwarded.
//!
//! Offsets only move forward. A transcript that shrank below its offset is
//! skipped with a warning rather than re-read.
//!
//! ## Pending tool calls
//!
//! Each live session keeps its own normalizer between ticks, so a Claude tool
//! call whose result lands in a later tick is still merged. The committed
//! offset never passes the record of a call that is still pending, so a
//! restarted monitor reads that record again and can still merge its result.
//! Records after it are re-emitted; sinks treat repeats as no-ops.
//!
//! When a session drops out of the active set, or the monitor stops, its
//! normalizer is flushed and whatever was pending is stored as-is.

use crate::config::Config;
use crate::error::Result;
use crate::opencode::{normalize_all, Assembler};
use crate::session::Scanner;
use crate::transcript::{normalizer_for, Normalizer, RecordCursor};
use crate::types::{Entry, Provider, SessionDescriptor};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Offset-table key for a session. Session ids are only unique per provider.
pub fn session_key(provider: Provider, session_id: &str) -> String {
    format!("{}:{}", provider.as_str(), session_id)
}

// ============================================
// Offsets
// ============================================

/// Shared, forward-only per-session offsets.
///
/// Cloning shares the underlying table, so a caller can read offsets while
/// the monitor task is running.
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the tracker, e.g. from a store's saved extraction state.
    pub fn from_map(offsets: HashMap<String, u64>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(offsets)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current offset for `key`, 0 if unseen.
    pub fn get(&self, key: &str) -> u64 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    /// Move `key` forward to `offset`. Returns false (and changes nothing)
    /// if that would move it backwards.
    pub fn advance(&self, key: &str, offset: u64) -> bool {
        let mut offsets = self.lock();
        let current = offsets.entry(key.to_string()).or_insert(0);
        if offset < *current {
            return false;
        }
        *current = offset;
        true
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.lock().clone()
    }
}

// ============================================
// Collaborators
// ============================================

/// Receives newly normalized entries.
///
/// `offset` is the session's offset once these entries are stored; sinks
/// that persist it can seed the next run's [`OffsetTracker`]. Storing the
/// same entry twice must be harmless.
pub trait EntrySink: Send + Sync {
    /// Store `entries` for `session`, returning how many were written.
    fn store(&self, session: &SessionDescriptor, entries: &[Entry], offset: u64) -> Result<usize>;
}

/// Decides which sessions the monitor should look at on each tick.
pub trait ActiveSessions: Send + Sync {
    fn active_sessions(&self) -> Result<Vec<SessionDescriptor>>;
}

/// Sessions whose artifacts changed within a time window.
pub struct RecentlyActive {
    scanner: Scanner,
    window: Duration,
}

impl RecentlyActive {
    pub fn new(scanner: Scanner, window: Duration) -> Self {
        Self { scanner, window }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Scanner::from_config(config),
            Duration::from_secs(config.monitor.active_window_minutes * 60),
        )
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Most recent write to a session's on-disk data.
///
/// OpenCode writes messages outside the session metadata file, so its
/// message directory counts too.
fn last_activity(session: &SessionDescriptor) -> Option<SystemTime> {
    let artifact = modified(&session.log_path);
    if session.provider != Provider::OpenCode {
        return artifact;
    }
    let messages = Assembler::for_session_file(&session.log_path)
        .ok()
        .and_then(|a| modified(&a.storage_dir().join("message").join(&session.session_id)));
    artifact.max(messages)
}

impl ActiveSessions for RecentlyActive {
    fn active_sessions(&self) -> Result<Vec<SessionDescriptor>> {
        let cutoff = SystemTime::now()
            .checked_sub(self.window)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let sessions: Vec<SessionDescriptor> = self
            .scanner
            .scan()?
            .into_iter()
            .filter(|s| last_activity(s).is_some_and(|t| t >= cutoff))
            .collect();
        tracing::debug!(count = sessions.len(), "Found recently active sessions");
        Ok(sessions)
    }
}

// ============================================
// Monitor
// ============================================

/// Outcome of one monitor pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Active sessions examined
    pub sessions: usize,
    /// Entries handed to the sink
    pub entries: usize,
    /// Unparseable records skipped
    pub skipped_records: usize,
    /// Sessions skipped because their transcript shrank
    pub truncated: usize,
    /// Sessions that failed to read or store
    pub failed: usize,
    /// Sessions flushed after leaving the active set
    pub flushed: usize,
}

/// Sequential reader of normalized records with a resumable position.
trait RecordSource {
    fn next_record(&mut self, normalizer: &mut dyn Normalizer) -> Result<Option<Vec<Entry>>>;
    /// Byte position just past the last consumed record
    fn offset(&self) -> u64;
    fn skipped(&self) -> usize;
}

impl RecordSource for RecordCursor {
    fn next_record(&mut self, normalizer: &mut dyn Normalizer) -> Result<Option<Vec<Entry>>> {
        RecordCursor::next_record(self, normalizer)
    }

    fn offset(&self) -> u64 {
        RecordCursor::offset(self)
    }

    fn skipped(&self) -> usize {
        RecordCursor::skipped(self)
    }
}

/// Per-session read state for line transcripts
struct LiveSession {
    descriptor: SessionDescriptor,
    normalizer: Box<dyn Normalizer>,
    /// Bytes consumed by the normalizer; ahead of the stored offset while
    /// entries are pending
    read_offset: u64,
    /// Entries produced but not yet accepted by the sink
    unsent: Vec<Entry>,
}

impl LiveSession {
    /// Pull every available record from `source` into `unsent`.
    ///
    /// `read_offset` follows the source even when a read fails part way, so
    /// entries already taken are not read a second time.
    fn read_from(&mut self, source: &mut impl RecordSource, report: &mut TickReport) -> Result<()> {
        let outcome = loop {
            match source.next_record(self.normalizer.as_mut()) {
                Ok(Some(entries)) => self.unsent.extend(entries),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.read_offset = source.offset();
        report.skipped_records += source.skipped();
        outcome
    }

    /// Offset that is safe to persist: nothing before it is still buffered.
    fn commit_offset(&self) -> u64 {
        match self.normalizer.earliest_pending_offset() {
            Some(pending) => pending.min(self.read_offset),
            None => self.read_offset,
        }
    }
}

/// Incremental monitor over active sessions.
pub struct Monitor {
    active: Box<dyn ActiveSessions>,
    sink: Arc<dyn EntrySink>,
    offsets: OffsetTracker,
    interval: Duration,
    live: HashMap<String, LiveSession>,
}

impl Monitor {
    pub fn new(
        active: impl ActiveSessions + 'static,
        sink: Arc<dyn EntrySink>,
        offsets: OffsetTracker,
        interval: Duration,
    ) -> Self {
        Self {
            active: Box::new(active),
            sink,
            offsets,
            interval,
            live: HashMap::new(),
        }
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    /// Run one synchronous pass over the active sessions.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let sessions = match self.active.active_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list active sessions");
                return report;
            }
        };
        report.sessions = sessions.len();

        let mut seen = HashSet::new();
        for session in &sessions {
            let key = session_key(session.provider, &session.session_id);
            if !seen.insert(key.clone()) {
                continue;
            }
            let outcome = match session.provider {
                Provider::OpenCode => self.process_assembled(&key, session, &mut report),
                Provider::Claude | Provider::Codex => {
                    self.process_lines(&key, session, &mut report)
                }
            };
            if let Err(e) = outcome {
                tracing::warn!(
                    session_id = %session.session_id,
                    provider = %session.provider,
                    error = %e,
                    "Failed to process session"
                );
                report.failed += 1;
            }
        }

        self.flush_inactive(&seen, &mut report);

        if report.entries > 0 {
            tracing::info!(
                sessions = report.sessions,
                entries = report.entries,
                "Monitor tick stored entries"
            );
        } else {
            tracing::debug!(sessions = report.sessions, "Monitor tick found nothing new");
        }
        report
    }

    fn process_lines(
        &mut self,
        key: &str,
        session: &SessionDescriptor,
        report: &mut TickReport,
    ) -> Result<()> {
        if !self.live.contains_key(key) {
            let Some(normalizer) = normalizer_for(session.provider) else {
                return Ok(());
            };
            self.live.insert(
                key.to_string(),
                LiveSession {
                    descriptor: session.clone(),
                    normalizer,
                    read_offset: self.offsets.get(key),
                    unsent: Vec::new(),
                },
            );
        }
        let Some(state) = self.live.get_mut(key) else {
            return Ok(());
        };
        state.descriptor = session.clone();

        let len = std::fs::metadata(&session.log_path)?.len();
        if len < state.read_offset {
            tracing::warn!(
                session_id = %session.session_id,
                path = %session.log_path.display(),
                offset = state.read_offset,
                len,
                "Transcript shrank below its offset, skipping"
            );
            report.truncated += 1;
            return Ok(());
        }

        if len > state.read_offset {
            let mut cursor = RecordCursor::open(&session.log_path, state.read_offset)?;
            state.read_from(&mut cursor, report)?;
        }

        if state.unsent.is_empty() {
            return Ok(());
        }
        let commit = state.commit_offset();
        let stored = self.sink.store(session, &state.unsent, commit)?;
        report.entries += stored;
        state.unsent.clear();
        self.offsets.advance(key, commit);
        Ok(())
    }

    fn process_assembled(
        &mut self,
        key: &str,
        session: &SessionDescriptor,
        report: &mut TickReport,
    ) -> Result<()> {
        let assembler = Assembler::for_session_file(&session.log_path)?;
        let messages = assembler.assemble(&session.session_id)?;

        let forwarded = self.offsets.get(key) as usize;
        if messages.len() < forwarded {
            tracing::warn!(
                session_id = %session.session_id,
                forwarded,
                available = messages.len(),
                "OpenCode session lost messages, skipping"
            );
            report.truncated += 1;
            return Ok(());
        }

        let settled = messages[forwarded..]
            .iter()
            .take_while(|m| m.is_settled())
            .count();
        if settled == 0 {
            return Ok(());
        }

        let end = forwarded + settled;
        let entries = normalize_all(&messages[forwarded..end]);
        report.entries += self.sink.store(session, &entries, end as u64)?;
        self.offsets.advance(key, end as u64);
        Ok(())
    }

    /// Flush and forget sessions that are no longer active.
    fn flush_inactive(&mut self, active: &HashSet<String>, report: &mut TickReport) {
        let gone: Vec<String> = self
            .live
            .keys()
            .filter(|key| !active.contains(*key))
            .cloned()
            .collect();

        for key in gone {
            let Some(mut state) = self.live.remove(&key) else {
                continue;
            };
            let commit = state.commit_offset();
            state.unsent.extend(state.normalizer.flush());
            report.flushed += 1;
            if state.unsent.is_empty() {
                continue;
            }
            match self
                .sink
                .store(&state.descriptor, &state.unsent, commit)
            {
                Ok(stored) => {
                    report.entries += stored;
                    self.offsets.advance(&key, commit);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %state.descriptor.session_id,
                        error = %e,
                        "Failed to store flushed entries"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    /// Flush every live session and store what its normalizer still held.
    ///
    /// Offsets stay at the earliest pending record, so a later run re-reads
    /// it and can fill in results that were not written yet.
    pub fn flush_all(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.flush_inactive(&HashSet::new(), &mut report);
        if report.flushed > 0 {
            tracing::debug!(
                sessions = report.flushed,
                entries = report.entries,
                "Flushed live sessions"
            );
        }
        report
    }

    /// Run the monitor on a fixed interval until stopped.
    ///
    /// The first pass runs immediately. Each pass runs on the blocking pool
    /// and completes before the next one is scheduled. On stop, live
    /// sessions are flushed before the task ends.
    pub fn start(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let offsets = self.offsets.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut monitor = self;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis() as u64, "Monitor started");

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let pass = tokio::task::spawn_blocking(move || {
                            let report = monitor.tick();
                            (monitor, report)
                        })
                        .await;
                        match pass {
                            Ok((returned, _report)) => monitor = returned,
                            Err(e) => {
                                tracing::error!(error = %e, "Monitor tick panicked");
                                return;
                            }
                        }
                    }
                }
            }

            match tokio::task::spawn_blocking(move || monitor.flush_all()).await {
                Ok(report) => tracing::info!(
                    flushed = report.flushed,
                    entries = report.entries,
                    "Monitor stopped"
                ),
                Err(e) => tracing::error!(error = %e, "Monitor flush panicked"),
            }
        });

        MonitorHandle {
            stop: stop_tx,
            task,
            offsets,
        }
    }
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    offsets: OffsetTracker,
}

impl MonitorHandle {
    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    /// Signal the monitor to stop and wait for the in-flight pass and the
    /// final flush to finish.
    pub async fn stop(self) {
        // The task may already have exited; nothing left to signal then.
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Monitor task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transcript::ClaudeNormalizer;
    use crate::opencode::tests::{write_json, write_message, write_text_part};
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<Vec<(String, Vec<Entry>, u64)>>,
    }

    impl MemorySink {
        fn batches(&self) -> Vec<(String, Vec<Entry>, u64)> {
            self.stored.lock().unwrap().clone()
        }
    }

    impl EntrySink for MemorySink {
        fn store(&self, session: &SessionDescriptor, entries: &[Entry], offset: u64) -> Result<usize> {
            self.stored
                .lock()
                .unwrap()
                .push((session.session_id.clone(), entries.to_vec(), offset));
            Ok(entries.len())
        }
    }

    #[derive(Clone, Default)]
    struct Fixed(Arc<Mutex<Vec<SessionDescriptor>>>);

    impl Fixed {
        fn set(&self, sessions: Vec<SessionDescriptor>) {
            *self.0.lock().unwrap() = sessions;
        }
    }

    impl ActiveSessions for Fixed {
        fn active_sessions(&self) -> Result<Vec<SessionDescriptor>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn descriptor(id: &str, provider: Provider, path: &Path) -> SessionDescriptor {
        SessionDescriptor {
            session_id: id.to_string(),
            provider,
            project_name: "p".to_string(),
            project_path: "/p".to_string(),
            worktree: None,
            ecosystem: None,
            jobs: Vec::new(),
            log_path: path.to_path_buf(),
            started_at: None,
        }
    }

    fn append(path: &Path, value: serde_json::Value) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{}", value).unwrap();
    }

    fn tool_call(id: &str) -> serde_json::Value {
        json!({"type": "assistant", "uuid": "u1", "message": {"id": "m1", "content": [
            {"type": "tool_use", "id": id, "name": "Bash", "input": {"command": "ls"}}
        ]}})
    }

    fn tool_result(id: &str) -> serde_json::Value {
        json!({"type": "user", "uuid": "u2", "message": {"content": [
            {"type": "tool_result", "tool_use_id": id, "content": "ok"}
        ]}})
    }

    fn monitor(active: Fixed, sink: Arc<MemorySink>, offsets: OffsetTracker) -> Monitor {
        Monitor::new(active, sink, offsets, Duration::from_millis(10))
    }

    #[test]
    fn test_offsets_only_move_forward() {
        let tracker = OffsetTracker::new();
        assert_eq!(tracker.get("claude:s"), 0);
        assert!(tracker.advance("claude:s", 10));
        assert!(!tracker.advance("claude:s", 5));
        assert_eq!(tracker.get("claude:s"), 10);

        let shared = tracker.clone();
        shared.advance("claude:s", 20);
        assert_eq!(tracker.snapshot()["claude:s"], 20);
    }

    #[test]
    fn test_tool_result_in_later_tick_is_merged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        append(&path, tool_call("t1"));

        let active = Fixed::default();
        active.set(vec![descriptor("s1", Provider::Claude, &path)]);
        let sink = Arc::new(MemorySink::default());
        let mut monitor = monitor(active, sink.clone(), OffsetTracker::new());

        let report = monitor.tick();
        assert_eq!(report.entries, 0);
        assert!(sink.batches().is_empty());
        assert_eq!(monitor.offsets().get("claude:s1"), 0);

        append(&path, tool_result("t1"));
        let report = monitor.tick();
        assert_eq!(report.entries, 1);

        let batches = sink.batches();
        let calls: Vec<_> = batches[0].1[0].tool_calls().collect();
        assert_eq!(calls[0].output.as_deref(), Some("ok"));
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(batches[0].2, len);
        assert_eq!(monitor.offsets().get("claude:s1"), len);

        assert_eq!(monitor.tick().entries, 0);
    }

    #[test]
    fn test_session_leaving_active_set_is_flushed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        append(&path, tool_call("t1"));

        let active = Fixed::default();
        active.set(vec![descriptor("s1", Provider::Claude, &path)]);
        let sink = Arc::new(MemorySink::default());
        let mut monitor = monitor(active.clone(), sink.clone(), OffsetTracker::new());

        monitor.tick();
        active.set(Vec::new());
        let report = monitor.tick();

        assert_eq!(report.flushed, 1);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1[0].tool_calls().next().unwrap().output, None);
        assert_eq!(batches[0].2, 0);
        assert_eq!(monitor.offsets().get("claude:s1"), 0);
    }

    #[test]
    fn test_restart_rereads_pending_tool_call() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        append(&path, tool_call("t1"));
        append(&path, json!({"type": "user", "uuid": "u3", "message": {"content": "hi"}}));

        let active = Fixed::default();
        active.set(vec![descriptor("s1", Provider::Claude, &path)]);
        let sink = Arc::new(MemorySink::default());

        let mut first = monitor(active.clone(), sink.clone(), OffsetTracker::new());
        assert_eq!(first.tick().entries, 1);
        assert_eq!(first.offsets().get("claude:s1"), 0);
        let saved = first.offsets().snapshot();
        drop(first);

        append(&path, tool_result("t1"));
        let mut second = monitor(active, sink.clone(), OffsetTracker::from_map(saved));
        assert_eq!(second.tick().entries, 2);

        let outputs: Vec<Option<String>> = sink
            .batches()
            .iter()
            .flat_map(|(_, entries, _)| entries.iter())
            .flat_map(|entry| entry.tool_calls())
            .filter(|call| call.id == "t1")
            .map(|call| call.output.clone())
            .collect();
        assert_eq!(outputs, vec![Some("ok".to_string())]);

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(second.offsets().get("claude:s1"), len);
    }

    struct Interrupted {
        record: Option<String>,
        offset: u64,
    }

    impl RecordSource for Interrupted {
        fn next_record(&mut self, normalizer: &mut dyn Normalizer) -> Result<Option<Vec<Entry>>> {
            match self.record.take() {
                Some(record) => {
                    self.offset += record.len() as u64 + 1;
                    normalizer.normalize(&record).map(Some)
                }
                None => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "read interrupted",
                ))),
            }
        }

        fn offset(&self) -> u64 {
            self.offset
        }

        fn skipped(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_failed_read_keeps_position_of_taken_records() {
        let path = Path::new("/tmp/s1.jsonl");
        let mut state = LiveSession {
            descriptor: descriptor("s1", Provider::Claude, path),
            normalizer: Box::new(ClaudeNormalizer::new()),
            read_offset: 0,
            unsent: Vec::new(),
        };
        let record = json!({"type": "user", "uuid": "u1", "message": {"content": "hi"}}).to_string();
        let mut source = Interrupted {
            offset: 0,
            record: Some(record.clone()),
        };

        let mut report = TickReport::default();
        assert!(state.read_from(&mut source, &mut report).is_err());
        assert_eq!(state.unsent.len(), 1);
        assert_eq!(state.read_offset, record.len() as u64 + 1);

        // A retry resumes after the taken record instead of reading it again.
        let mut retry = Interrupted {
            offset: state.read_offset,
            record: None,
        };
        assert!(state.read_from(&mut retry, &mut report).is_err());
        assert_eq!(state.unsent.len(), 1);
    }

    #[test]
    fn test_truncated_transcript_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        append(&path, json!({"type": "user", "message": {"content": "hi"}}));

        let active = Fixed::default();
        active.set(vec![descriptor("s1", Provider::Claude, &path)]);
        let sink = Arc::new(MemorySink::default());
        let offsets = OffsetTracker::from_map(HashMap::from([("claude:s1".to_string(), 10_000)]));
        let mut monitor = monitor(active, sink.clone(), offsets);

        let report = monitor.tick();
        assert_eq!(report.truncated, 1);
        assert!(sink.batches().is_empty());
        assert_eq!(monitor.offsets().get("claude:s1"), 10_000);
    }

    #[test]
    fn test_codex_entries_forwarded_incrementally() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollout.jsonl");
        append(&path, json!({"type": "event_msg", "payload": {"type": "agent_message", "message": "one"}}));

        let active = Fixed::default();
        active.set(vec![descriptor("cx", Provider::Codex, &path)]);
        let sink = Arc::new(MemorySink::default());
        let mut monitor = monitor(active, sink.clone(), OffsetTracker::new());

        assert_eq!(monitor.tick().entries, 1);
        append(&path, json!({"type": "event_msg", "payload": {"type": "agent_message", "message": "two"}}));
        assert_eq!(monitor.tick().entries, 1);

        let batches = sink.batches();
        assert_eq!(batches[1].1[0].text(), "two");
    }

    #[test]
    fn test_opencode_forwards_only_settled_messages() {
        let dir = TempDir::new().unwrap();
        let storage = dir.path();
        let session_file = storage.join("session/proj/ses_1.json");
        write_json(&session_file, json!({"id": "ses_1"}));
        write_message(storage, "ses_1", "msg_1", "user", 1_000);
        write_text_part(storage, "msg_1", "prt_1", "hello");
        write_json(
            &storage.join("message/ses_1/msg_2.json"),
            json!({"id": "msg_2", "sessionID": "ses_1", "role": "assistant", "time": {"created": 2_000}}),
        );
        write_text_part(storage, "msg_2", "prt_1", "partial");

        let active = Fixed::default();
        active.set(vec![descriptor("ses_1", Provider::OpenCode, &session_file)]);
        let sink = Arc::new(MemorySink::default());
        let mut monitor = monitor(active, sink.clone(), OffsetTracker::new());

        assert_eq!(monitor.tick().entries, 1);
        assert_eq!(monitor.offsets().get("opencode:ses_1"), 1);

        write_message(storage, "ses_1", "msg_2", "assistant", 2_000);
        assert_eq!(monitor.tick().entries, 1);
        assert_eq!(monitor.offsets().get("opencode:ses_1"), 2);
        assert_eq!(sink.batches()[1].1[0].text(), "partial");
    }

    #[test]
    fn test_missing_transcript_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let active = Fixed::default();
        active.set(vec![descriptor("gone", Provider::Claude, &dir.path().join("gone.jsonl"))]);
        let mut monitor = monitor(active, Arc::new(MemorySink::default()), OffsetTracker::new());
        assert_eq!(monitor.tick().failed, 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        append(&path, json!({"type": "user", "uuid": "u1", "message": {"content": "hi"}}));

        let active = Fixed::default();
        active.set(vec![descriptor("s1", Provider::Claude, &path)]);
        let sink = Arc::new(MemorySink::default());
        let handle = monitor(active, sink.clone(), OffsetTracker::new()).start();

        for _ in 0..100 {
            if !sink.batches().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let offsets = handle.offsets().clone();
        handle.stop().await;

        assert_eq!(sink.batches().len(), 1);
        assert!(offsets.get("claude:s1") > 0);
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_tool_calls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        append(&path, tool_call("t1"));
        append(&path, json!({"type": "user", "uuid": "u3", "message": {"content": "hi"}}));

        let active = Fixed::default();
        active.set(vec![descriptor("s1", Provider::Claude, &path)]);
        let sink = Arc::new(MemorySink::default());
        let handle = monitor(active, sink.clone(), OffsetTracker::new()).start();

        for _ in 0..100 {
            if !sink.batches().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let offsets = handle.offsets().clone();
        handle.stop().await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        let flushed = &batches[1];
        assert_eq!(flushed.1.len(), 1);
        assert_eq!(flushed.1[0].tool_calls().next().unwrap().output, None);
        assert_eq!(flushed.2, 0);
        assert_eq!(offsets.get("claude:s1"), 0);
    }
}
