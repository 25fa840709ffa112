//! Sliding-window conversation memory.
//!
//! Conversations are keyed by `(thread_id, user_id)`; the same thread id
//! under different users is a different conversation. Storage is SQLite:
//! a `conversations` row per thread and an append-only `messages` table with
//! a per-conversation monotonic `sequence`.
//!
//! `context()` returns at most one summary (as a system message) followed by
//! the last N raw messages in chronological order, after sequence
//! validation: any `tool` message whose `tool_call_id` is not matched by a
//! retained `assistant.tool_calls` entry is dropped. This protects the
//! downstream LLM from protocol violations left behind by crashes or manual
//! edits.

pub mod summarizer;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::config::MemoryConfig;
use crate::error::{GriyaError, Result};
use crate::llm::{ChatMessage, ChatModel, Role, ToolCall};

/// SQLite-backed conversation memory.
pub struct ConversationMemory {
    conn: Mutex<Connection>,
    config: MemoryConfig,
}

impl ConversationMemory {
    pub fn open(path: impl AsRef<Path>, config: MemoryConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, config)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory(config: MemoryConfig) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, config)
    }

    fn with_connection(conn: Connection, config: MemoryConfig) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                user_id TEXT NOT NULL DEFAULT 'anonymous',
                title TEXT,
                summary TEXT,
                summary_up_to_sequence INTEGER NOT NULL DEFAULT 0,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (thread_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_name TEXT,
                tool_call_id TEXT,
                tool_calls TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_thread_user
                ON conversations(thread_id, user_id);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation_sequence
                ON messages(conversation_id, sequence);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    fn conversation_id(conn: &Connection, thread_id: &str, user_id: &str) -> Result<i64> {
        if user_id.is_empty() || user_id == "anonymous" {
            log::warn!("anonymous conversation access for thread '{thread_id}'");
        }
        let existing = conn
            .query_row(
                "SELECT id FROM conversations WHERE thread_id = ?1 AND user_id = ?2",
                params![thread_id, user_id],
                |row| row.get::<_, i64>(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let now = Self::now();
        conn.execute(
            "INSERT INTO conversations (thread_id, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![thread_id, user_id, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn lookup_conversation(
        conn: &Connection,
        thread_id: &str,
        user_id: &str,
    ) -> Result<Option<i64>> {
        conn.query_row(
            "SELECT id FROM conversations WHERE thread_id = ?1 AND user_id = ?2",
            params![thread_id, user_id],
            |row| row.get::<_, i64>(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(GriyaError::Database(other)),
        })
    }

    /// Append a whole turn's messages as a single commit.
    ///
    /// Atomicity matters here: a partial write could leave a `tool` message
    /// without its parent `assistant` on disk.
    pub fn append_turn(
        &self,
        thread_id: &str,
        user_id: &str,
        messages: &[ChatMessage],
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let conversation_id = Self::conversation_id(&tx, thread_id, user_id)?;
        let mut sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        let now = Self::now();
        for message in messages {
            sequence += 1;
            let tool_calls_json = if message.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&message.tool_calls)?)
            };
            tx.execute(
                "INSERT INTO messages
                    (conversation_id, sequence, role, content, tool_name, tool_call_id, tool_calls, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    conversation_id,
                    sequence,
                    message.role.as_str(),
                    message.content,
                    message.tool_name,
                    message.tool_call_id,
                    tool_calls_json,
                    now,
                ],
            )?;

            // First user message titles the conversation.
            if sequence == 1 && message.role == Role::User {
                let title: String = message.content.chars().take(100).collect();
                tx.execute(
                    "UPDATE conversations SET title = ?1 WHERE id = ?2",
                    params![title, conversation_id],
                )?;
            }
        }

        tx.execute(
            "UPDATE conversations
             SET message_count = message_count + ?1, updated_at = ?2
             WHERE id = ?3",
            params![messages.len() as i64, now, conversation_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Messages for the next LLM call: optional summary as a system message,
    /// then the last N raw messages in chronological order, repaired.
    pub fn context(&self, thread_id: &str, user_id: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let Some(conversation_id) = Self::lookup_conversation(&conn, thread_id, user_id)? else {
            return Ok(Vec::new());
        };

        let summary: Option<String> = conn.query_row(
            "SELECT summary FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT role, content, tool_name, tool_call_id, tool_calls
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY sequence DESC
             LIMIT ?2",
        )?;
        let mut rows: Vec<ChatMessage> = stmt
            .query_map(params![conversation_id, self.config.window as i64], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                let tool_name: Option<String> = row.get(2)?;
                let tool_call_id: Option<String> = row.get(3)?;
                let tool_calls_json: Option<String> = row.get(4)?;
                Ok((role, content, tool_name, tool_call_id, tool_calls_json))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(role, content, tool_name, tool_call_id, tool_calls_json)| {
                let tool_calls: Vec<ToolCall> = tool_calls_json
                    .as_deref()
                    .and_then(|json| serde_json::from_str(json).ok())
                    .unwrap_or_default();
                ChatMessage {
                    role: Role::parse(&role).unwrap_or(Role::User),
                    content,
                    tool_calls,
                    tool_call_id,
                    tool_name,
                }
            })
            .collect();
        drop(stmt);
        drop(conn);

        rows.reverse();
        let mut messages = validate_sequence(rows);

        if let Some(summary) = summary.filter(|s| !s.is_empty()) {
            messages.insert(
                0,
                ChatMessage::system(format!("Ringkasan percakapan sebelumnya: {summary}")),
            );
        }
        Ok(messages)
    }

    /// Total stored messages for a conversation.
    pub fn message_count(&self, thread_id: &str, user_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let Some(conversation_id) = Self::lookup_conversation(&conn, thread_id, user_id)? else {
            return Ok(0);
        };
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Current stored summary, if any.
    pub fn summary(&self, thread_id: &str, user_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let Some(conversation_id) = Self::lookup_conversation(&conn, thread_id, user_id)? else {
            return Ok(None);
        };
        let summary: Option<String> = conn.query_row(
            "SELECT summary FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(summary.filter(|s| !s.is_empty()))
    }

    /// Summarize the older tail when the conversation has outgrown the
    /// threshold. Returns true when a new summary was committed.
    ///
    /// The previous summary is replaced atomically together with the new
    /// `summary_up_to_sequence`; with compaction on, the summarized tail is
    /// deleted in the same transaction.
    pub async fn maybe_summarize(
        &self,
        thread_id: &str,
        user_id: &str,
        model: &dyn ChatModel,
    ) -> Result<bool> {
        // Phase 1: read everything we need, then release the lock before the
        // LLM call.
        let (conversation_id, existing_summary, tail, up_to) = {
            let conn = self.conn.lock();
            let Some(conversation_id) = Self::lookup_conversation(&conn, thread_id, user_id)?
            else {
                return Ok(false);
            };

            let (summary, summary_up_to): (Option<String>, i64) = conn.query_row(
                "SELECT summary, summary_up_to_sequence FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            if (total as usize) <= self.config.summarize_threshold {
                return Ok(false);
            }

            let max_sequence: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            let window_start = max_sequence - self.config.window as i64;

            let mut stmt = conn.prepare(
                "SELECT sequence, role, content FROM messages
                 WHERE conversation_id = ?1 AND sequence > ?2 AND sequence <= ?3
                 ORDER BY sequence ASC",
            )?;
            let tail: Vec<(i64, String, String)> = stmt
                .query_map(params![conversation_id, summary_up_to, window_start], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if tail.is_empty() {
                // Nothing older than the window: never summarize.
                return Ok(false);
            }
            let up_to = tail.last().map(|(seq, _, _)| *seq).unwrap_or(summary_up_to);
            (conversation_id, summary, tail, up_to)
        };

        let transcript: Vec<(String, String)> = tail
            .into_iter()
            .map(|(_, role, content)| (role, content))
            .collect();
        let new_summary =
            summarizer::summarize(model, existing_summary.as_deref(), &transcript).await?;

        // Phase 2: atomic replacement.
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE conversations
             SET summary = ?1, summary_up_to_sequence = ?2, updated_at = ?3
             WHERE id = ?4",
            params![new_summary, up_to, Self::now(), conversation_id],
        )?;
        if self.config.compact_on_summarize {
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1 AND sequence <= ?2",
                params![conversation_id, up_to],
            )?;
        }
        tx.commit()?;
        log::info!("summarized thread '{thread_id}' up to sequence {up_to}");
        Ok(true)
    }
}

/// Drop tool messages that would violate the assistant/tool pairing the LLM
/// API requires.
fn validate_sequence(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut pending: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::Assistant => {
                for call in &message.tool_calls {
                    pending.insert(call.id.clone());
                }
                result.push(message);
            }
            Role::Tool => {
                let keep = message
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| pending.remove(id));
                if keep {
                    result.push(message);
                } else {
                    log::debug!(
                        "dropping orphan tool message (tool_call_id {:?})",
                        message.tool_call_id
                    );
                }
            }
            _ => result.push(message),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletion, ToolSpec};
    use async_trait::async_trait;

    fn memory() -> ConversationMemory {
        ConversationMemory::open_in_memory(MemoryConfig::default()).unwrap()
    }

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "search_properties".to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn turns_are_ordered_and_scoped_per_user() {
        let memory = memory();
        memory
            .append_turn("t1", "alice", &[ChatMessage::user("halo")])
            .unwrap();
        memory
            .append_turn("t1", "bob", &[ChatMessage::user("hi")])
            .unwrap();
        memory
            .append_turn("t1", "alice", &[ChatMessage::assistant("halo juga")])
            .unwrap();

        let alice = memory.context("t1", "alice").unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].content, "halo");
        assert_eq!(alice[1].content, "halo juga");

        // Same thread id, different user: a different conversation.
        let bob = memory.context("t1", "bob").unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].content, "hi");
    }

    #[test]
    fn window_returns_last_n_in_chronological_order() {
        let config = MemoryConfig {
            window: 3,
            ..Default::default()
        };
        let memory = ConversationMemory::open_in_memory(config).unwrap();
        for i in 0..10 {
            memory
                .append_turn("t", "u", &[ChatMessage::user(format!("m{i}"))])
                .unwrap();
        }
        let context = memory.context("t", "u").unwrap();
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].content, "m7");
        assert_eq!(context[2].content, "m9");
    }

    #[test]
    fn orphan_tool_message_is_dropped_on_read() {
        let memory = memory();
        // Corrupt sequence: a tool message with no parent assistant.
        memory
            .append_turn(
                "t",
                "u",
                &[
                    ChatMessage::user("hi"),
                    ChatMessage::tool("call_x", "search_properties", "{}"),
                    ChatMessage::assistant("ok"),
                ],
            )
            .unwrap();

        let context = memory.context("t", "u").unwrap();
        assert_eq!(context.len(), 2);
        assert!(context.iter().all(|m| m.role != Role::Tool));
        assert_eq!(context.last().unwrap().content, "ok");
    }

    #[test]
    fn paired_tool_messages_survive_validation() {
        let memory = memory();
        memory
            .append_turn(
                "t",
                "u",
                &[
                    ChatMessage::user("cari rumah"),
                    ChatMessage::assistant_with_tools("", vec![tool_call("call_1")]),
                    ChatMessage::tool("call_1", "search_properties", "{\"results\":[]}"),
                    ChatMessage::assistant("tidak ketemu"),
                ],
            )
            .unwrap();

        let context = memory.context("t", "u").unwrap();
        assert_eq!(context.len(), 4);
        assert_eq!(context[2].role, Role::Tool);
        assert_eq!(context[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_reply_outside_window_does_not_leak_orphans() {
        // Window cut between assistant and its tool reply: the tool message
        // leads the window and must be dropped.
        let config = MemoryConfig {
            window: 2,
            ..Default::default()
        };
        let memory = ConversationMemory::open_in_memory(config).unwrap();
        memory
            .append_turn(
                "t",
                "u",
                &[
                    ChatMessage::assistant_with_tools("", vec![tool_call("call_1")]),
                    ChatMessage::tool("call_1", "search_properties", "{}"),
                    ChatMessage::assistant("done"),
                ],
            )
            .unwrap();

        let context = memory.context("t", "u").unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "done");
    }

    struct FixedSummarizer;

    #[async_trait]
    impl ChatModel for FixedSummarizer {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> crate::error::Result<ChatCompletion> {
            Ok(ChatCompletion {
                content: "Pengguna mencari rumah di Medan.".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn summarization_triggers_past_threshold() {
        let config = MemoryConfig {
            window: 5,
            summarize_threshold: 10,
            compact_on_summarize: false,
        };
        let memory = ConversationMemory::open_in_memory(config).unwrap();
        for i in 0..12 {
            memory
                .append_turn("t", "u", &[ChatMessage::user(format!("m{i}"))])
                .unwrap();
        }

        let summarized = memory.maybe_summarize("t", "u", &FixedSummarizer).await.unwrap();
        assert!(summarized);
        assert_eq!(
            memory.summary("t", "u").unwrap().as_deref(),
            Some("Pengguna mencari rumah di Medan.")
        );

        // The summary arrives as a leading system message.
        let context = memory.context("t", "u").unwrap();
        assert_eq!(context[0].role, Role::System);
        assert!(context[0].content.contains("Pengguna mencari rumah"));
    }

    #[tokio::test]
    async fn short_conversations_never_summarize() {
        let memory = memory();
        for i in 0..5 {
            memory
                .append_turn("t", "u", &[ChatMessage::user(format!("m{i}"))])
                .unwrap();
        }
        let summarized = memory.maybe_summarize("t", "u", &FixedSummarizer).await.unwrap();
        assert!(!summarized);
        assert_eq!(memory.summary("t", "u").unwrap(), None);
    }

    #[tokio::test]
    async fn compaction_deletes_the_summarized_tail() {
        let config = MemoryConfig {
            window: 3,
            summarize_threshold: 5,
            compact_on_summarize: true,
        };
        let memory = ConversationMemory::open_in_memory(config).unwrap();
        for i in 0..8 {
            memory
                .append_turn("t", "u", &[ChatMessage::user(format!("m{i}"))])
                .unwrap();
        }

        assert!(memory.maybe_summarize("t", "u", &FixedSummarizer).await.unwrap());
        // Only the window (and newer) messages remain on disk.
        assert_eq!(memory.message_count("t", "u").unwrap(), 3);
    }
}
