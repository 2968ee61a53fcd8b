use serde::{Deserialize, Serialize};

/// Minimum and maximum chunk length in characters, per spec.md §3
/// (`MemoryChunk` invariant: `chunk length ∈ [MIN_LEN, MAX_LEN]`).
pub const MIN_CHUNK_LEN: usize = 20;
pub const MAX_CHUNK_LEN: usize = 500;

/// A single ingested unit of memory: one `## `-delimited section of a
/// source markdown file (or a sub-split of an oversized one).
///
/// `hash` is a pure function of `text` — chunks sharing a hash share one
/// cached embedding, so re-ingesting an unchanged file is a no-op past the
/// hash comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryChunk {
    /// `{source}#{index}` — stable across re-ingestion as long as section
    /// ordering within the source doesn't change.
    pub id: String,
    pub text: String,
    /// File stem the chunk was split from (e.g. `long_memory`, `2026-07-30`).
    pub source: String,
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
    /// Source file mtime, unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub max_age_days: Option<i64>,
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResult {
    pub text: String,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordResult {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridResult {
    pub id: String,
    pub source: String,
    pub text: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub rrf_score: f64,
}

/// Fusion strategy for [`HybridResult`] ranking — spec.md §4.C offers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMode {
    /// Σ 1/(k+rank_i), k=60.
    Rrf,
    /// vectorScore directly (already in [0,1]) + normalized BM25, weighted.
    Weighted,
}

/// Rendered context window handed to the prompt builder (component N).
#[derive(Debug, Clone)]
pub struct UserContext {
    pub rendered: String,
    pub chunk_count: usize,
    pub built_at: chrono::DateTime<chrono::Utc>,
}
