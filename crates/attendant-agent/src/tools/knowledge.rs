//! Knowledge base tools — search and write operator-curated facts.
//!
//! The knowledge base is just long-term memory (spec.md §4.C) under sources
//! named `knowledge:<topic>`: writing a topic ingests it as a chunked,
//! embedded, FTS5-indexed source; searching it runs the same hybrid search
//! used for conversational recall, scoped to knowledge sources only.
//!
//! Two tools:
//! - `knowledge_search` — hybrid (vector + keyword) query over `knowledge:*` sources.
//! - `knowledge_write`  — upsert a topic; re-ingesting the same topic replaces it.

use std::sync::Arc;

use async_trait::async_trait;

use attendant_memory::store::HybridOptions;
use attendant_memory::types::SearchFilters;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

const KNOWLEDGE_PREFIX: &str = "knowledge:";

// ---------------------------------------------------------------------------
// knowledge_search
// ---------------------------------------------------------------------------

/// Search the knowledge base by hybrid query.
pub struct KnowledgeSearchTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> KnowledgeSearchTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for KnowledgeSearchTool<C> {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the persistent knowledge base for facts, configurations, and technical details. \
         Use this before answering questions about available models, setup instructions, \
         deployment steps, or any topic that might have been saved previously. \
         Returns up to 5 matching entries with full content."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Full-text search query. Use keywords or phrases (e.g. 'claude models', 'discord setup', 'deployment')."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.to_string(),
            _ => return ToolResult::error("missing required parameter: query"),
        };

        let opts = HybridOptions {
            top_k: 5,
            filters: SearchFilters {
                max_age_days: None,
                sources: None,
            },
            ..HybridOptions::default()
        };

        match self.ctx.memory().hybrid_search(&query, &opts).await {
            Ok(hits) => {
                let hits: Vec<_> = hits
                    .into_iter()
                    .filter(|h| h.source.starts_with(KNOWLEDGE_PREFIX))
                    .collect();
                if hits.is_empty() {
                    return ToolResult::success(format!("No knowledge entries found for: {}", query));
                }
                let mut out = format!("Found {} knowledge entry/entries:\n\n", hits.len());
                for hit in &hits {
                    let topic = hit.source.trim_start_matches(KNOWLEDGE_PREFIX);
                    out.push_str(&format!("### {}\n{}\n\n---\n\n", topic, hit.text));
                }
                ToolResult::success(out.trim_end_matches("\n\n---\n\n").to_string())
            }
            Err(e) => ToolResult::error(format!("knowledge_search failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// knowledge_write
// ---------------------------------------------------------------------------

/// Upsert a topic in the knowledge base.
pub struct KnowledgeWriteTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> KnowledgeWriteTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for KnowledgeWriteTool<C> {
    fn name(&self) -> &str {
        "knowledge_write"
    }

    fn description(&self) -> &str {
        "Save or update a fact in the persistent knowledge base. \
         Use this to remember technical details, configurations, instructions, or \
         any information that should be available in future conversations. \
         Existing entries with the same topic are overwritten."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "Unique slug identifying this entry (e.g. 'claude_models', 'discord_setup', 'deploy_steps'). Use underscores, no spaces."
                },
                "content": {
                    "type": "string",
                    "description": "Markdown content to store. Be concise but complete."
                }
            },
            "required": ["topic", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let topic = match input.get("topic").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: topic"),
        };
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: content"),
        };

        let source = format!("{KNOWLEDGE_PREFIX}{topic}");
        // Drop any previous chunks for this topic first — ingest_source
        // only upserts by id, so a shorter rewrite would otherwise leave
        // stale trailing chunks behind.
        let _ = self.ctx.memory().delete_by_source(&source);
        match self
            .ctx
            .memory()
            .ingest_source(&source, &content, chrono::Utc::now().timestamp())
        {
            Ok(_) => ToolResult::success(format!("Knowledge saved: {}", topic)),
            Err(e) => ToolResult::error(format!("knowledge_write failed: {e}")),
        }
    }
}
