//! SQLite message store
//!
//! Persists monitor output. Messages are keyed by
//! `provider:session_id:message_id`, so storing the same entry again is an
//! update, not a duplicate. Each session also records its extraction state
//! (offset, last message) so a restarted monitor resumes where it stopped.
//!
//! Claude may spread one message over several records that share an id.
//! Their parts are merged into a single row: parts already present are kept
//! once, and a tool call seen again (e.g. now carrying its output) replaces
//! the earlier copy.

pub mod schema;

use crate::error::Result;
use crate::monitor::{session_key, EntrySink};
use crate::transcript::parse_error;
use crate::types::{Entry, Part, SessionDescriptor};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Fold `incoming` parts into `existing` without duplicating any.
fn merge_parts(existing: &mut Vec<Part>, incoming: &[Part]) {
    for part in incoming {
        if let Part::ToolCall(call) = part {
            let known = existing
                .iter_mut()
                .find(|p| matches!(p, Part::ToolCall(c) if c.id == call.id && !call.id.is_empty()));
            if let Some(slot) = known {
                *slot = part.clone();
                continue;
            }
        }
        if !existing.contains(part) {
            existing.push(part.clone());
        }
    }
}

/// SQLite-backed [`EntrySink`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run migrations on this store
    pub fn migrate(&self) -> Result<()> {
        schema::run_migrations(&self.connection())
    }

    /// Saved offsets keyed like [`session_key`], for seeding a monitor.
    pub fn load_offsets(&self) -> Result<HashMap<String, u64>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT session_key, file_offset FROM extraction_state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut offsets = HashMap::new();
        for row in rows {
            let (key, offset) = row?;
            offsets.insert(key, offset.max(0) as u64);
        }
        tracing::debug!(count = offsets.len(), "Loaded extraction offsets");
        Ok(offsets)
    }

    /// Number of stored messages for a session
    pub fn message_count(&self, session: &SessionDescriptor) -> Result<usize> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM messages WHERE provider = ?1 AND session_id = ?2",
            params![session.provider.as_str(), session.session_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Stored entry for a message, if any
    pub fn get_entry(&self, session: &SessionDescriptor, message_id: &str) -> Result<Option<Entry>> {
        let key = message_key(session, message_id);
        let conn = self.connection();
        let row: Option<(String, Option<String>, String)> = conn
            .query_row(
                "SELECT role, emitted_at, parts FROM messages WHERE id = ?1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((role, emitted_at, parts)) = row else {
            return Ok(None);
        };
        let mut entry = Entry::new(
            session.provider,
            role.parse()
                .map_err(|e: String| parse_error(session.provider, e))?,
        );
        entry.message_id = message_id.to_string();
        entry.timestamp = emitted_at
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc));
        entry.parts = serde_json::from_str(&parts)?;
        Ok(Some(entry))
    }
}

fn message_key(session: &SessionDescriptor, message_id: &str) -> String {
    format!(
        "{}:{}",
        session_key(session.provider, &session.session_id),
        message_id
    )
}

impl EntrySink for SqliteStore {
    fn store(&self, session: &SessionDescriptor, entries: &[Entry], offset: u64) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for entry in entries {
            let key = message_key(session, &entry.message_id);

            let existing: Option<String> = tx
                .query_row(
                    "SELECT parts FROM messages WHERE id = ?1",
                    params![key],
                    |r| r.get(0),
                )
                .optional()?;
            let mut parts: Vec<Part> = match existing {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            merge_parts(&mut parts, &entry.parts);

            let content = parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");

            tx.execute(
                r#"
                INSERT INTO messages (id, provider, session_id, message_id, role, emitted_at,
                                      content, parts, tokens_in, tokens_out, observed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    emitted_at = COALESCE(messages.emitted_at, excluded.emitted_at),
                    content = excluded.content,
                    parts = excluded.parts,
                    tokens_in = COALESCE(excluded.tokens_in, messages.tokens_in),
                    tokens_out = COALESCE(excluded.tokens_out, messages.tokens_out),
                    observed_at = excluded.observed_at
                "#,
                params![
                    key,
                    session.provider.as_str(),
                    session.session_id,
                    entry.message_id,
                    entry.role.as_str(),
                    entry.timestamp.map(|t| t.to_rfc3339()),
                    content,
                    serde_json::to_string(&parts)?,
                    entry.tokens.map(|t| t.input as i64),
                    entry.tokens.map(|t| t.output as i64),
                    now,
                ],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO extraction_state (session_key, provider, session_id, transcript_path,
                                          file_offset, last_message_id, last_extraction)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(session_key) DO UPDATE SET
                transcript_path = excluded.transcript_path,
                file_offset = MAX(extraction_state.file_offset, excluded.file_offset),
                last_message_id = COALESCE(excluded.last_message_id, extraction_state.last_message_id),
                last_extraction = excluded.last_extraction
            "#,
            params![
                session_key(session.provider, &session.session_id),
                session.provider.as_str(),
                session.session_id,
                session.log_path.to_string_lossy().to_string(),
                offset as i64,
                entries.last().map(|e| e.message_id.as_str()),
                now,
            ],
        )?;

        tx.commit()?;
        tracing::debug!(
            session_id = %session.session_id,
            provider = %session.provider,
            count = entries.len(),
            offset,
            "Stored entries"
        );
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Provider, Role, TokenUsage, ToolCall};
    use std::path::PathBuf;

    fn session() -> SessionDescriptor {
        SessionDescriptor {
            session_id: "s1".to_string(),
            provider: Provider::Claude,
            project_name: "api".to_string(),
            project_path: "/work/api".to_string(),
            worktree: None,
            ecosystem: None,
            jobs: Vec::new(),
            log_path: PathBuf::from("/logs/s1.jsonl"),
            started_at: None,
        }
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn text_entry(id: &str, text: &str) -> Entry {
        let mut entry = Entry::new(Provider::Claude, Role::Assistant);
        entry.message_id = id.to_string();
        entry.parts.push(Part::Text {
            text: text.to_string(),
        });
        entry
    }

    fn call(id: &str, output: Option<&str>) -> Part {
        Part::ToolCall(ToolCall {
            id: id.to_string(),
            name: "Bash".to_string(),
            output: output.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn test_storing_twice_does_not_duplicate() {
        let store = store();
        let entries = vec![text_entry("m1", "hello"), text_entry("m2", "world")];
        store.store(&session(), &entries, 100).unwrap();
        store.store(&session(), &entries, 100).unwrap();

        assert_eq!(store.message_count(&session()).unwrap(), 2);
        let stored = store.get_entry(&session(), "m1").unwrap().unwrap();
        assert_eq!(stored.parts, entries[0].parts);
    }

    #[test]
    fn test_records_sharing_an_id_are_merged() {
        let store = store();
        let mut first = text_entry("m1", "running ls");
        first.tokens = Some(TokenUsage {
            input: 10,
            output: 2,
            ..Default::default()
        });
        let mut second = Entry::new(Provider::Claude, Role::Assistant);
        second.message_id = "m1".to_string();
        second.parts.push(call("t1", None));

        store.store(&session(), &[first], 10).unwrap();
        store.store(&session(), &[second.clone()], 20).unwrap();
        second.parts = vec![call("t1", Some("ok"))];
        store.store(&session(), &[second], 30).unwrap();

        let stored = store.get_entry(&session(), "m1").unwrap().unwrap();
        assert_eq!(stored.parts.len(), 2);
        assert_eq!(stored.text(), "running ls");
        assert_eq!(stored.tool_calls().next().unwrap().output.as_deref(), Some("ok"));
        assert_eq!(store.message_count(&session()).unwrap(), 1);
    }

    #[test]
    fn test_offsets_persist_and_never_regress() {
        let store = store();
        store.store(&session(), &[text_entry("m1", "a")], 500).unwrap();
        store.store(&session(), &[text_entry("m2", "b")], 200).unwrap();

        let offsets = store.load_offsets().unwrap();
        assert_eq!(offsets["claude:s1"], 500);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/messages.db");
        let store = SqliteStore::open(&path).unwrap();
        store.migrate().unwrap();
        assert!(path.exists());
        assert!(store.get_entry(&session(), "none").unwrap().is_none());
    }
}
