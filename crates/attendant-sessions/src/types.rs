use serde::{Deserialize, Serialize};

use attendant_core::ModelTier;

/// A single content block within a message — spec.md §3 ("content is either
/// text or a structured list of content blocks").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: String },
}

/// Message role, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in a session's history.
///
/// Content is always stored as a list of blocks even for plain text, so
/// compaction and the tool-result invariant below don't need a second code
/// path for the "just text" case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// `true` if this message contains at least one `tool_use` block.
    ///
    /// Per the invariant in spec.md §3, such a message must be immediately
    /// followed by a user message whose content is the matching
    /// `tool_result` blocks, in emission order.
    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Per-conversation state — spec.md §3 ("Session").
///
/// Keyed by `attendant_core::ConversationId` alone rather than a three-part
/// `user:{id}:agent:{id}:{name}` key: this system keys sessions by
/// conversation id, with no per-process multi-user isolation beyond that
/// (spec.md §1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub history: Vec<Message>,
    pub model: ModelTier,
    pub last_accessed: chrono::DateTime<chrono::Utc>,
    pub pinned_context: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            model: ModelTier::default(),
            last_accessed: chrono::Utc::now(),
            pinned_context: String::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_default_model_and_empty_history() {
        let s = Session::new();
        assert!(s.history.is_empty());
        assert_eq!(s.model, ModelTier::Medium);
        assert!(s.pinned_context.is_empty());
    }

    #[test]
    fn has_tool_use_detects_tool_use_blocks() {
        let m = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "tu-1".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "a.md"}),
            }],
        };
        assert!(m.has_tool_use());
        assert_eq!(m.tool_use_ids(), vec!["tu-1"]);
    }

    #[test]
    fn text_helper_wraps_a_single_text_block() {
        let m = Message::text(Role::User, "hi");
        assert!(!m.has_tool_use());
        assert_eq!(m.content.len(), 1);
    }
}
