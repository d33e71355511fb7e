//! Transcript normalization
//!
//! Every provider normalizer implements [`Normalizer`]: it consumes one raw
//! record and yields zero or more canonical [`Entry`] values, in source
//! order. [`EntryStream`] drives a normalizer over a transcript file.
//!
//! ## Error Handling
//!
//! - **Malformed records**: the normalizer returns `Err`, the stream logs the
//!   failure, counts it in [`EntryStream::skipped`], and continues.
//! - **Incomplete last line**: a final line without a trailing newline is only
//!   consumed if it parses. Otherwise it is assumed to still be written and
//!   the offset stays before it, so an incremental reader picks it up later.
//! - **Buffered state**: [`Normalizer::flush`] is called once after the last
//!   record so pending tool calls are never dropped.

pub mod claude;
pub mod codex;

pub use claude::ClaudeNormalizer;
pub use codex::CodexNormalizer;

use crate::error::{Error, Result};
use crate::opencode::Assembler;
use crate::types::{Entry, Provider};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Converts raw provider records into canonical entries.
pub trait Normalizer: Send {
    /// Which provider's records this normalizer understands
    fn provider(&self) -> Provider;

    /// Normalize one raw record.
    ///
    /// Returns an empty vector for records with nothing displayable. An `Err`
    /// means the record itself is malformed; callers skip it and continue.
    fn normalize(&mut self, record: &str) -> Result<Vec<Entry>>;

    /// Normalize a record that starts at byte `offset` of its transcript.
    fn normalize_at(&mut self, record: &str, offset: u64) -> Result<Vec<Entry>> {
        let _ = offset;
        self.normalize(record)
    }

    /// Byte offset of the earliest record whose entries are still buffered.
    ///
    /// A reader that persists its position must not move past this offset,
    /// or a restart would lose the buffered entries.
    fn earliest_pending_offset(&self) -> Option<u64> {
        None
    }

    /// Release anything still buffered at end of input.
    fn flush(&mut self) -> Vec<Entry> {
        Vec::new()
    }
}

/// Returns a fresh line normalizer for `provider`.
///
/// OpenCode has no line-oriented transcript; its sessions go through
/// [`Assembler`] instead.
pub fn normalizer_for(provider: Provider) -> Option<Box<dyn Normalizer>> {
    match provider {
        Provider::Claude => Some(Box::new(ClaudeNormalizer::new())),
        Provider::Codex => Some(Box::new(CodexNormalizer::new())),
        Provider::OpenCode => None,
    }
}

pub(crate) fn parse_error(provider: Provider, message: impl std::fmt::Display) -> Error {
    Error::Parse {
        provider: provider.to_string(),
        message: message.to_string(),
    }
}

/// Fill in ids for entries the provider left anonymous.
///
/// The id is derived from the byte offset of the producing record, so
/// re-reading the same file yields the same ids.
fn assign_fallback_ids(entries: &mut [Entry], record_offset: u64) {
    for (i, entry) in entries.iter_mut().enumerate() {
        if entry.message_id.is_empty() {
            entry.message_id = if i == 0 {
                format!("@{}", record_offset)
            } else {
                format!("@{}.{}", record_offset, i)
            };
        }
    }
}

// ============================================
// Record cursor
// ============================================

/// Reads a JSONL transcript one record at a time from a byte offset.
pub(crate) struct RecordCursor {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    line: usize,
    skipped: usize,
    done: bool,
}

impl RecordCursor {
    pub(crate) fn open(path: &Path, offset: u64) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {}: {}", path.display(), e),
            ))
        })?;
        let mut reader = BufReader::new(file);
        if offset > 0 {
            reader.seek(SeekFrom::Start(offset))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            offset,
            line: 0,
            skipped: 0,
            done: false,
        })
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    /// Consume the next non-blank record and return what it produced.
    /// `Ok(None)` at end of readable data.
    pub(crate) fn next_record(
        &mut self,
        normalizer: &mut dyn Normalizer,
    ) -> Result<Option<Vec<Entry>>> {
        let mut buf = Vec::new();
        while !self.done {
            buf.clear();
            let read = self.reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                self.done = true;
                break;
            }

            let terminated = buf.last() == Some(&b'\n');
            let record_offset = self.offset;
            let line_number = self.line;
            let line = String::from_utf8_lossy(&buf);
            let record = line.trim();

            if record.is_empty() {
                if !terminated {
                    self.done = true;
                    break;
                }
                self.offset += read as u64;
                self.line += 1;
                continue;
            }

            match normalizer.normalize_at(record, record_offset) {
                Ok(mut entries) => {
                    self.offset += read as u64;
                    self.line += 1;
                    assign_fallback_ids(&mut entries, record_offset);
                    return Ok(Some(entries));
                }
                Err(e) if !terminated => {
                    tracing::debug!(
                        path = %self.path.display(),
                        offset = record_offset,
                        error = %e,
                        "Incomplete trailing record, leaving for next read"
                    );
                    self.done = true;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_number,
                        offset = record_offset,
                        error = %e,
                        "Skipping unparseable record"
                    );
                    self.offset += read as u64;
                    self.line += 1;
                    self.skipped += 1;
                }
            }
        }
        Ok(None)
    }
}

// ============================================
// Entry stream
// ============================================

enum Source {
    Lines {
        cursor: RecordCursor,
        normalizer: Box<dyn Normalizer>,
        flushed: bool,
    },
    Assembled,
}

/// Lazy sequence of canonical entries read from one session artifact.
///
/// For Claude and Codex the artifact is a JSONL transcript; for OpenCode it
/// is the session metadata file, and the whole session is assembled up
/// front. The stream is finite and restartable by opening it again.
pub struct EntryStream {
    provider: Provider,
    source: Source,
    queue: VecDeque<Entry>,
    failed: bool,
}

impl EntryStream {
    /// Open `path` from the beginning.
    pub fn open(path: &Path, provider: Provider) -> Result<Self> {
        Self::open_at(path, provider, 0)
    }

    /// Open `path`, skipping the first `offset` bytes.
    ///
    /// `offset` must be a record boundary, typically a previous
    /// [`EntryStream::offset`]. It is ignored for OpenCode.
    pub fn open_at(path: &Path, provider: Provider, offset: u64) -> Result<Self> {
        match normalizer_for(provider) {
            Some(normalizer) => Ok(Self {
                provider,
                source: Source::Lines {
                    cursor: RecordCursor::open(path, offset)?,
                    normalizer,
                    flushed: false,
                },
                queue: VecDeque::new(),
                failed: false,
            }),
            None => {
                let entries = Assembler::for_session_file(path)?.normalize_session_file(path)?;
                Ok(Self {
                    provider,
                    source: Source::Assembled,
                    queue: entries.into(),
                    failed: false,
                })
            }
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Byte position just past the last consumed record.
    pub fn offset(&self) -> u64 {
        match &self.source {
            Source::Lines { cursor, .. } => cursor.offset(),
            Source::Assembled => 0,
        }
    }

    /// Number of malformed records skipped so far
    pub fn skipped(&self) -> usize {
        match &self.source {
            Source::Lines { cursor, .. } => cursor.skipped(),
            Source::Assembled => 0,
        }
    }
}

impl Iterator for EntryStream {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        loop {
            if let Some(entry) = self.queue.pop_front() {
                return Some(entry);
            }
            if self.failed {
                return None;
            }
            let Source::Lines {
                cursor,
                normalizer,
                flushed,
            } = &mut self.source
            else {
                return None;
            };
            if *flushed {
                return None;
            }
            match cursor.next_record(normalizer.as_mut()) {
                Ok(Some(entries)) => self.queue.extend(entries),
                Ok(None) => {
                    *flushed = true;
                    self.queue.extend(normalizer.flush());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transcript read failed, ending stream");
                    self.failed = true;
                    self.queue.extend(normalizer.flush());
                }
            }
        }
    }
}

/// Normalize a whole artifact into memory.
pub fn read_entries(path: &Path, provider: Provider) -> Result<Vec<Entry>> {
    Ok(EntryStream::open(path, provider)?.collect())
}

/// Normalize only the records whose zero-based line index falls in
/// `[start, end)`. `end = None` reads to the end of the file.
///
/// The range is normalized with fresh state, so a tool call whose result
/// falls outside the range is flushed with empty output.
pub fn read_line_range(
    path: &Path,
    provider: Provider,
    start: usize,
    end: Option<usize>,
) -> Result<Vec<Entry>> {
    let Some(mut normalizer) = normalizer_for(provider) else {
        return read_entries(path, provider);
    };

    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut offset = 0u64;

    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let record_offset = offset;
        offset += line.len() as u64 + 1;

        if index < start {
            continue;
        }
        if end.is_some_and(|end| index >= end) {
            break;
        }

        let line = String::from_utf8_lossy(&line);
        let record = line.trim();
        if record.is_empty() {
            continue;
        }
        match normalizer.normalize_at(record, record_offset) {
            Ok(mut produced) => {
                assign_fallback_ids(&mut produced, record_offset);
                entries.extend(produced);
            }
            Err(e) => {
                tracing::debug!(line = index, error = %e, "Skipping unparseable record");
            }
        }
    }

    entries.extend(normalizer.flush());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Part, Role};
    use std::io::Write;
    use tempfile::TempDir;

    const ASSISTANT_T1: &str = r#"{"type":"assistant","uuid":"a1","timestamp":"2025-01-01T00:00:00Z","message":{"id":"msg_1","role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#;
    const USER_T1: &str = r#"{"type":"user","uuid":"u1","timestamp":"2025-01-01T00:00:01Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_claude_tool_result_merges_into_single_entry() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "s.jsonl",
            &format!("{}\n{}\n", ASSISTANT_T1, USER_T1),
        );

        let entries = read_entries(&path, Provider::Claude).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::Assistant);
        let call = entries[0].tool_calls().next().unwrap();
        assert_eq!(call.id, "t1");
        assert_eq!(call.output.as_deref(), Some("ok"));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let user = r#"{"type":"user","uuid":"u2","message":{"role":"user","content":"hello"}}"#;
        let path = write_file(&dir, "s.jsonl", &format!("not json\n\n{}\n", user));

        let mut stream = EntryStream::open(&path, Provider::Claude).unwrap();
        let entries: Vec<Entry> = stream.by_ref().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text(), "hello");
        assert_eq!(stream.skipped(), 1);
    }

    #[test]
    fn test_unterminated_partial_record_is_not_consumed() {
        let dir = TempDir::new().unwrap();
        let first = r#"{"type":"user","uuid":"u1","message":{"role":"user","content":"one"}}"#;
        let second = r#"{"type":"user","uuid":"u2","message":{"role":"user","content":"two"}}"#;
        let (head, tail) = second.split_at(20);
        let path = write_file(&dir, "s.jsonl", &format!("{}\n{}", first, head));

        let mut stream = EntryStream::open(&path, Provider::Claude).unwrap();
        let entries: Vec<Entry> = stream.by_ref().collect();
        assert_eq!(entries.len(), 1);
        let offset = stream.offset();
        assert_eq!(offset, first.len() as u64 + 1);
        assert_eq!(stream.skipped(), 0);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", tail).unwrap();

        let rest: Vec<Entry> = EntryStream::open_at(&path, Provider::Claude, offset)
            .unwrap()
            .collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text(), "two");
    }

    #[test]
    fn test_unterminated_complete_record_is_consumed() {
        let dir = TempDir::new().unwrap();
        let record = r#"{"type":"user","uuid":"u1","message":{"role":"user","content":"one"}}"#;
        let path = write_file(&dir, "s.jsonl", record);

        let mut stream = EntryStream::open(&path, Provider::Claude).unwrap();
        assert_eq!(stream.by_ref().count(), 1);
        assert_eq!(stream.offset(), record.len() as u64);
    }

    #[test]
    fn test_codex_entries_get_offset_ids() {
        let dir = TempDir::new().unwrap();
        let first = r#"{"type":"event_msg","payload":{"type":"agent_message","message":"hi"}}"#;
        let second = r#"{"type":"event_msg","payload":{"type":"agent_reasoning","text":"hmm"}}"#;
        let path = write_file(&dir, "rollout.jsonl", &format!("{}\n{}\n", first, second));

        let entries = read_entries(&path, Provider::Codex).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message_id, "@0");
        assert_eq!(entries[1].message_id, format!("@{}", first.len() + 1));
        assert!(matches!(entries[1].parts[0], Part::Reasoning { .. }));

        let again = read_entries(&path, Provider::Codex).unwrap();
        assert_eq!(entries, again);
    }

    #[test]
    fn test_read_line_range_uses_physical_lines() {
        let dir = TempDir::new().unwrap();
        let lines = [
            r#"{"type":"user","uuid":"u0","message":{"role":"user","content":"zero"}}"#,
            "",
            r#"{"type":"user","uuid":"u2","message":{"role":"user","content":"two"}}"#,
            r#"{"type":"user","uuid":"u3","message":{"role":"user","content":"three"}}"#,
        ];
        let path = write_file(&dir, "s.jsonl", &format!("{}\n", lines.join("\n")));

        let entries = read_line_range(&path, Provider::Claude, 2, Some(3)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text(), "two");

        let tail = read_line_range(&path, Provider::Claude, 1, None).unwrap();
        let texts: Vec<String> = tail.iter().map(Entry::text).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn test_range_flushes_calls_without_results() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "s.jsonl",
            &format!("{}\n{}\n", ASSISTANT_T1, USER_T1),
        );

        let entries = read_line_range(&path, Provider::Claude, 0, Some(1)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool_calls().next().unwrap().output, None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = EntryStream::open(&dir.path().join("missing.jsonl"), Provider::Codex);
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
