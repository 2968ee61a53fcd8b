use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use attendant_core::{ConversationId, ModelTier};

use crate::error::{Result, SessionError};
use crate::types::{ContentBlock, Message, Role, Session};

/// Keep this many trailing messages verbatim on compaction — spec.md §4.G.
const KEEP_ON_COMPACT: usize = 4;
/// Replace the compacted remainder with at most this many summary messages.
const MAX_SUMMARY_CHUNKS: usize = 3;

tokio::task_local! {
    /// Ambient binding for "the conversation this task is currently handling",
    /// so tools invoked deep in the tool-use loop can discover it without it
    /// being threaded through every call — spec.md §4.G `withCurrent`.
    static CURRENT_CONVERSATION: ConversationId;
}

/// Thread-safe, in-memory manager for per-conversation session state —
/// spec.md §4.G and §3 ("Ownership": sessions are owned by the process, not
/// the disk). Reworked from a SQLite-backed `SessionManager` into a
/// `DashMap`-backed store with TTL+LRU eviction, since spec.md §3 is
/// explicit that sessions do not survive a restart.
pub struct SessionManager {
    sessions: DashMap<ConversationId, Session>,
    cap: usize,
    ttl: chrono::Duration,
}

impl SessionManager {
    pub fn new(cap: usize, ttl_hours: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            cap,
            ttl: chrono::Duration::hours(ttl_hours),
        }
    }

    /// Return the conversation's message history, creating the session on
    /// first access. Bumps `last_accessed`.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get_history(&self, id: &ConversationId) -> Vec<Message> {
        self.touch(id).history
    }

    /// Swap the active model tier for a conversation.
    #[instrument(skip(self), fields(conversation_id = %id, ?model))]
    pub fn set_model(&self, id: &ConversationId, model: ModelTier) {
        let mut session = self.entry(id);
        session.model = model;
        session.last_accessed = chrono::Utc::now();
    }

    /// Append a note to the pinned-context string. Pinned context is never
    /// trimmed by compaction — spec.md §3.
    #[instrument(skip(self, note), fields(conversation_id = %id))]
    pub fn append_pinned(&self, id: &ConversationId, note: &str) {
        let mut session = self.entry(id);
        if !session.pinned_context.is_empty() {
            session.pinned_context.push('\n');
        }
        session.pinned_context.push_str(note);
        session.last_accessed = chrono::Utc::now();
    }

    /// Append a message to history, enforcing the tool_use/tool_result
    /// ordering invariant from spec.md §3.
    #[instrument(skip(self, message), fields(conversation_id = %id))]
    pub fn append(&self, id: &ConversationId, message: Message) -> Result<()> {
        let mut session = self.entry(id);
        if let Some(last) = session.history.last() {
            if last.role == Role::Assistant && last.has_tool_use() {
                let expected: Vec<&str> = last.tool_use_ids();
                if message.role != Role::User {
                    return Err(SessionError::InvalidSequence(
                        "assistant tool_use message must be followed by a user message".into(),
                    ));
                }
                let provided: Vec<&str> = message
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                        _ => None,
                    })
                    .collect();
                if provided != expected {
                    return Err(SessionError::InvalidSequence(format!(
                        "tool_result ids {provided:?} do not match pending tool_use ids {expected:?}"
                    )));
                }
            }
        }
        session.history.push(message);
        session.last_accessed = chrono::Utc::now();
        Ok(())
    }

    /// Render the context block assembled for the next prompt: pinned
    /// context followed by the full (possibly already-compacted) history —
    /// the caller (component N) further wraps this with workspace and
    /// memory-search material.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn build_context_for_prompt(&self, id: &ConversationId) -> (String, Vec<Message>) {
        let session = self.touch(id);
        (session.pinned_context.clone(), session.history.clone())
    }

    /// Compact history in place: keep the last `KEEP_ON_COMPACT` messages
    /// verbatim, replace everything before them with the given summaries
    /// (already produced by the caller, since summarization is an LLM call
    /// outside this crate's concern) — spec.md §4.G.
    #[instrument(skip(self, summaries), fields(conversation_id = %id))]
    pub fn compact(&self, id: &ConversationId, summaries: Vec<String>) {
        let mut session = self.entry(id);
        if session.history.len() <= KEEP_ON_COMPACT {
            return;
        }
        let tail_start = session.history.len() - KEEP_ON_COMPACT;
        let tail = session.history.split_off(tail_start);

        let mut summary_messages: Vec<Message> = summaries
            .into_iter()
            .take(MAX_SUMMARY_CHUNKS)
            .map(|s| Message::text(Role::Assistant, s))
            .collect();
        summary_messages.extend(tail);
        session.history = summary_messages;
    }

    /// Run `f` with `id` bound as the ambient "current conversation" for the
    /// duration of the future — spec.md §4.G `withCurrent`.
    pub async fn with_current<F, T>(&self, id: ConversationId, f: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        CURRENT_CONVERSATION.scope(id, f).await
    }

    /// The ambient conversation id bound by the innermost `with_current`
    /// call on this task, if any.
    pub fn current() -> Option<ConversationId> {
        CURRENT_CONVERSATION.try_with(|id| id.clone()).ok()
    }

    /// Evict sessions whose TTL has elapsed, then (if still over cap) evict
    /// least-recently-accessed sessions until at or under cap — spec.md §3.
    #[instrument(skip(self))]
    pub fn evict_stale(&self) {
        let now = chrono::Utc::now();
        let expired: Vec<ConversationId> = self
            .sessions
            .iter()
            .filter(|e| now - e.value().last_accessed > self.ttl)
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "evicted expired sessions");
        }

        let over = self.sessions.len().saturating_sub(self.cap);
        if over == 0 {
            return;
        }
        let mut by_access: Vec<(ConversationId, chrono::DateTime<chrono::Utc>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed))
            .collect();
        by_access.sort_by_key(|(_, last)| *last);
        for (id, _) in by_access.into_iter().take(over) {
            self.sessions.remove(&id);
        }
        warn!(evicted = over, cap = self.cap, "evicted LRU sessions to stay within cap");
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn touch(&self, id: &ConversationId) -> Session {
        let mut entry = self.sessions.entry(id.clone()).or_insert_with(Session::new);
        entry.last_accessed = chrono::Utc::now();
        entry.clone()
    }

    fn entry(&self, id: &ConversationId) -> dashmap::mapref::one::RefMut<'_, ConversationId, Session> {
        self.sessions.entry(id.clone()).or_insert_with(Session::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConversationId {
        ConversationId::from(s)
    }

    #[test]
    fn get_history_lazily_creates_a_session() {
        let mgr = SessionManager::new(100, 24);
        assert!(mgr.get_history(&id("c1")).is_empty());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn append_enforces_tool_result_pairing() {
        let mgr = SessionManager::new(100, 24);
        let cid = id("c1");
        let assistant = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "tu-1".into(),
                name: "read_file".into(),
                input: serde_json::json!({}),
            }],
        };
        mgr.append(&cid, assistant).unwrap();

        let bad = Message::text(Role::User, "oops, no tool_result");
        assert!(mgr.append(&cid, bad).is_err());

        let good = Message {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: "tu-1".into(),
                content: "file contents".into(),
            }],
        };
        assert!(mgr.append(&cid, good).is_ok());
    }

    #[test]
    fn pinned_context_survives_compaction() {
        let mgr = SessionManager::new(100, 24);
        let cid = id("c1");
        mgr.append_pinned(&cid, "remember: likes tea");
        for i in 0..10 {
            mgr.append(&cid, Message::text(Role::User, format!("msg {i}"))).unwrap();
        }
        mgr.compact(&cid, vec!["summary of earlier turns".into()]);
        let (pinned, history) = mgr.build_context_for_prompt(&cid);
        assert_eq!(pinned, "remember: likes tea");
        assert_eq!(history.len(), KEEP_ON_COMPACT + 1);
    }

    #[test]
    fn evict_stale_respects_ttl() {
        let mgr = SessionManager::new(100, 0);
        mgr.get_history(&id("c1"));
        // TTL of 0 hours means "immediately stale" on the next eviction pass.
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.evict_stale();
        assert!(mgr.is_empty());
    }

    #[test]
    fn evict_stale_enforces_cap_by_lru() {
        let mgr = SessionManager::new(2, 24);
        mgr.get_history(&id("c1"));
        mgr.get_history(&id("c2"));
        mgr.get_history(&id("c3"));
        mgr.evict_stale();
        assert_eq!(mgr.len(), 2);
    }

    #[tokio::test]
    async fn with_current_binds_ambient_conversation() {
        let mgr = SessionManager::new(100, 24);
        assert!(SessionManager::current().is_none());
        let seen = mgr
            .with_current(id("c1"), async { SessionManager::current() })
            .await;
        assert_eq!(seen, Some(id("c1")));
    }
}
