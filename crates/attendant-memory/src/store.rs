use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::embedding::EmbeddingEngine;
use crate::error::{MemoryError, Result};
use crate::types::{
    FusionMode, HybridResult, KeywordResult, MemoryChunk, SearchFilters, SemanticResult,
    MAX_CHUNK_LEN, MIN_CHUNK_LEN,
};

/// Semantic-search result cache TTL and cap — spec.md §4.C.
const SEMANTIC_CACHE_TTL: Duration = Duration::from_secs(60);
const SEMANTIC_CACHE_CAP: usize = 100;
/// RRF constant — spec.md §4.C ("Σ 1/(k+rank_i), k=60").
const RRF_K: f64 = 60.0;
/// Default hybrid fusion weights — spec.md §4.C ("defaults 0.7/0.3").
const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;
const DEFAULT_KEYWORD_WEIGHT: f64 = 0.3;

/// Per-leg bounded timeouts for hybrid search — spec.md §4.C/§4.F: a
/// slow/hanging embed or FTS5 query must not block the turn indefinitely.
/// Each leg returns empty on timeout; hybrid returns what succeeded.
const EMBED_LEG_TIMEOUT: Duration = Duration::from_secs(3);
const SEARCH_LEG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub top_k: usize,
    pub fusion: FusionMode,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub filters: SearchFilters,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            fusion: FusionMode::Rrf,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
            filters: SearchFilters::default(),
        }
    }
}

/// Ingest, index, and search chunked markdown memory — spec.md §4.C.
///
/// Keyword search rides on the FTS5 usage pattern from `manager.rs`'s
/// `user_memory_fts`; semantic search and rank fusion are
/// new, since nothing in the pack runs a local vector search — it's a
/// brute-force cosine scan over the (small, personal-assistant-scale) chunk
/// set rather than a dedicated ANN index.
pub struct ChunkStore {
    db: Mutex<Connection>,
    embedding: Arc<EmbeddingEngine>,
    semantic_cache: Mutex<HashMap<String, (Vec<SemanticResult>, Instant)>>,
}

impl ChunkStore {
    pub fn new(conn: Connection, embedding: Arc<EmbeddingEngine>) -> Self {
        Self {
            db: Mutex::new(conn),
            embedding,
            semantic_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Split `content` into chunks by `^## ` headers (further splitting
    /// oversized sections at line boundaries, dropping undersized ones),
    /// embed, and upsert — spec.md §4.C Ingest.
    pub fn ingest_source(&self, source: &str, content: &str, mtime: i64) -> Result<usize> {
        let sections = split_sections(content);
        let mut chunks = Vec::new();
        for (idx, text) in sections.into_iter().enumerate() {
            for (sub_idx, piece) in split_oversized(&text).into_iter().enumerate() {
                let trimmed = piece.trim();
                if trimmed.len() < MIN_LEN {
                    continue;
                }
                chunks.push(MemoryChunk {
                    id: format!("{source}#{idx}.{sub_idx}"),
                    text: trimmed.to_string(),
                    source: source.to_string(),
                    hash: content_hash(trimmed),
                    embedding: None,
                    timestamp: mtime,
                });
            }
        }
        let n = chunks.len();
        self.upsert_chunks(chunks)?;
        Ok(n)
    }

    /// Idempotent upsert keyed by hash — unchanged hashes reuse their
    /// cached embedding instead of re-embedding.
    pub fn upsert_chunks(&self, chunks: Vec<MemoryChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let to_embed: Vec<String> = {
            let db = self.db.lock().unwrap();
            chunks
                .iter()
                .filter(|c| {
                    let existing: Option<String> = db
                        .query_row(
                            "SELECT hash FROM memory_chunks WHERE id = ?1",
                            rusqlite::params![c.id],
                            |r| r.get(0),
                        )
                        .ok();
                    existing.as_deref() != Some(c.hash.as_str())
                })
                .map(|c| c.text.clone())
                .collect()
        };
        let fresh_embeddings = self.embedding.embed_batch(&to_embed);
        let mut fresh_iter = fresh_embeddings.into_iter();

        let db = self.db.lock().unwrap();
        for chunk in &chunks {
            let existing_hash: Option<String> = db
                .query_row(
                    "SELECT hash FROM memory_chunks WHERE id = ?1",
                    rusqlite::params![chunk.id],
                    |r| r.get(0),
                )
                .ok();

            let embedding_blob: Vec<u8> = if existing_hash.as_deref() == Some(chunk.hash.as_str())
            {
                db.query_row(
                    "SELECT embedding FROM memory_chunks WHERE id = ?1",
                    rusqlite::params![chunk.id],
                    |r| r.get(0),
                )
                .unwrap_or_default()
            } else {
                let v = fresh_iter.next().unwrap_or_else(|| vec![0.0; crate::embedding::EMBEDDING_DIM]);
                serialize_vec(&v)
            };

            db.execute(
                "INSERT INTO memory_chunks (id, source, text, hash, embedding, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = excluded.embedding,
                    timestamp = excluded.timestamp",
                rusqlite::params![
                    chunk.id,
                    chunk.source,
                    chunk.text,
                    chunk.hash,
                    embedding_blob,
                    chunk.timestamp,
                ],
            )?;
            let rowid = db.query_row(
                "SELECT rowid FROM memory_chunks WHERE id = ?1",
                rusqlite::params![chunk.id],
                |r| r.get::<_, i64>(0),
            )?;
            db.execute(
                "INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES('delete', ?1, ?2)",
                rusqlite::params![rowid, chunk.text],
            )
            .ok();
            db.execute(
                "INSERT INTO chunks_fts(rowid, text) VALUES (?1, ?2)",
                rusqlite::params![rowid, chunk.text],
            )?;
        }
        Ok(())
    }

    pub fn delete_by_source(&self, source: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM memory_chunks WHERE source = ?1",
            rusqlite::params![source],
        )?;
        Ok(())
    }

    /// Semantic search — spec.md §4.C Semantic search. Cached for 60s by a
    /// key derived from (rounded embedding prefix, topK, minScore, filters).
    pub fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        min_score: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<SemanticResult>> {
        let cache_key = semantic_cache_key(query_vec, top_k, min_score, filters);
        if let Some(hit) = self.cache_get(&cache_key) {
            return Ok(hit);
        }

        let rows = self.load_all_with_embeddings(filters)?;
        let mut scored: Vec<SemanticResult> = rows
            .into_iter()
            .map(|(_, source, text, emb)| {
                let score = EmbeddingEngine::cosine(query_vec, &emb, true);
                SemanticResult { text, source, score }
            })
            .filter(|r| r.score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(top_k);

        self.cache_put(cache_key, scored.clone());
        Ok(scored)
    }

    /// Keyword search — spec.md §4.C Keyword search. Tokenizes into
    /// unicode letters/digits (covers Hangul via `char::is_alphanumeric`),
    /// scores via sqlite FTS5's bm25 (lower = better, matching the spec).
    pub fn search_keyword(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<KeywordResult>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_query = tokens.join(" OR ");

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT m.id, m.source, m.text, bm25(chunks_fts) as score, m.timestamp
             FROM chunks_fts
             JOIN memory_chunks m ON m.rowid = chunks_fts.rowid
             WHERE chunks_fts MATCH ?1
             ORDER BY score
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![match_query, k * 4], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let now = chrono::Utc::now().timestamp();
        let mut out = Vec::new();
        for row in rows.filter_map(|r| r.ok()) {
            let (id, source, text, score, ts) = row;
            if !passes_filters(&source, ts, now, filters) {
                continue;
            }
            out.push(KeywordResult { id, source, text, score });
            if out.len() >= k {
                break;
            }
        }
        Ok(out)
    }

    /// Hybrid — spec.md §4.C Hybrid. Fetches 2·topK from each leg and fuses.
    ///
    /// Each leg (embed, semantic search, keyword search) runs off the async
    /// runtime under its own bounded timeout via `spawn_blocking`, since
    /// they're synchronous rusqlite/CPU work; a leg that times out or panics
    /// contributes an empty result rather than failing the whole call.
    pub async fn hybrid_search(
        self: Arc<Self>,
        query: &str,
        opts: &HybridOptions,
    ) -> Result<Vec<HybridResult>> {
        let fetch_n = opts.top_k * 2;

        let store = Arc::clone(&self);
        let q = query.to_string();
        let query_vec = match timeout(
            EMBED_LEG_TIMEOUT,
            spawn_blocking(move || store.embedding.embed(&q, true)),
        )
        .await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(error = %e, "embed leg panicked; hybrid search returning empty");
                return Ok(Vec::new());
            }
            Err(_) => {
                warn!("embed leg timed out; hybrid search returning empty");
                return Ok(Vec::new());
            }
        };

        let store = Arc::clone(&self);
        let filters = opts.filters.clone();
        let qv = query_vec.clone();
        let semantic = match timeout(
            SEARCH_LEG_TIMEOUT,
            spawn_blocking(move || store.search(&qv, fetch_n, 0.0, &filters)),
        )
        .await
        {
            Ok(Ok(Ok(v))) => v,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "semantic search leg failed; continuing without it");
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "semantic search leg panicked; continuing without it");
                Vec::new()
            }
            Err(_) => {
                warn!("semantic search leg timed out; continuing without it");
                Vec::new()
            }
        };

        let store = Arc::clone(&self);
        let filters = opts.filters.clone();
        let q = query.to_string();
        let keyword = match timeout(
            SEARCH_LEG_TIMEOUT,
            spawn_blocking(move || store.search_keyword(&q, fetch_n, &filters)),
        )
        .await
        {
            Ok(Ok(Ok(v))) => v,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "keyword search leg failed; continuing without it");
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "keyword search leg panicked; continuing without it");
                Vec::new()
            }
            Err(_) => {
                warn!("keyword search leg timed out; continuing without it");
                Vec::new()
            }
        };

        if semantic.is_empty() && keyword.is_empty() {
            return Ok(Vec::new());
        }

        let fused = match opts.fusion {
            FusionMode::Rrf => fuse_rrf(&semantic, &keyword),
            FusionMode::Weighted => {
                fuse_weighted(&semantic, &keyword, opts.vector_weight, opts.keyword_weight)
            }
        };

        let mut deduped = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for r in fused {
            let key = (r.source.clone(), r.text.chars().take(100).collect::<String>());
            if seen.insert(key) {
                deduped.push(r);
            }
        }
        deduped.truncate(opts.top_k);
        Ok(deduped)
    }

    fn load_all_with_embeddings(
        &self,
        filters: &SearchFilters,
    ) -> Result<Vec<(String, String, String, Vec<f32>)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, source, text, embedding, timestamp FROM memory_chunks",
        )?;
        let now = chrono::Utc::now().timestamp();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows.filter_map(|r| r.ok()) {
            let (id, source, text, blob, ts) = row;
            if !passes_filters(&source, ts, now, filters) {
                continue;
            }
            out.push((id, source, text, deserialize_vec(&blob)));
        }
        Ok(out)
    }

    fn cache_get(&self, key: &str) -> Option<Vec<SemanticResult>> {
        let cache = self.semantic_cache.lock().unwrap();
        let (results, at) = cache.get(key)?;
        if at.elapsed() < SEMANTIC_CACHE_TTL {
            Some(results.clone())
        } else {
            None
        }
    }

    fn cache_put(&self, key: String, results: Vec<SemanticResult>) {
        let mut cache = self.semantic_cache.lock().unwrap();
        if cache.len() >= SEMANTIC_CACHE_CAP {
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(key, (results, Instant::now()));
    }
}

const MIN_LEN: usize = MIN_CHUNK_LEN;

fn passes_filters(source: &str, ts: i64, now: i64, filters: &SearchFilters) -> bool {
    if let Some(max_age) = filters.max_age_days {
        if now - ts > max_age * 86_400 {
            return false;
        }
    }
    if let Some(sources) = &filters.sources {
        if !sources.iter().any(|s| s == source) {
            return false;
        }
    }
    true
}

fn split_sections(content: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.starts_with("## ") && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    if sections.is_empty() && !content.trim().is_empty() {
        sections.push(content.to_string());
    }
    sections
}

fn split_oversized(text: &str) -> Vec<String> {
    if text.len() <= MAX_CHUNK_LEN {
        return vec![text.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if current.len() + line.len() + 1 > MAX_CHUNK_LEN && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn serialize_vec(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn semantic_cache_key(
    query_vec: &[f32],
    top_k: usize,
    min_score: f64,
    filters: &SearchFilters,
) -> String {
    let prefix: Vec<String> = query_vec
        .iter()
        .take(10)
        .map(|v| format!("{:.3}", v))
        .collect();
    format!(
        "{}|{top_k}|{min_score:.2}|{:?}|{:?}",
        prefix.join(","),
        filters.max_age_days,
        filters.sources,
    )
}

fn fuse_rrf(semantic: &[SemanticResult], keyword: &[KeywordResult]) -> Vec<HybridResult> {
    let mut scores: HashMap<(String, String), (f64, Option<f64>, Option<f64>)> = HashMap::new();
    for (rank, r) in semantic.iter().enumerate() {
        let key = (r.source.clone(), r.text.clone());
        let entry = scores.entry(key).or_insert((0.0, None, None));
        entry.0 += 1.0 / (RRF_K + rank as f64 + 1.0);
        entry.1 = Some(r.score);
    }
    for (rank, r) in keyword.iter().enumerate() {
        let key = (r.source.clone(), r.text.clone());
        let entry = scores.entry(key).or_insert((0.0, None, None));
        entry.0 += 1.0 / (RRF_K + rank as f64 + 1.0);
        entry.2 = Some(r.score);
    }
    let mut out: Vec<HybridResult> = scores
        .into_iter()
        .map(|((source, text), (rrf, vscore, kscore))| HybridResult {
            id: format!("{source}:{}", content_hash(&text)),
            source,
            text,
            vector_score: vscore,
            keyword_score: kscore,
            rrf_score: rrf,
        })
        .collect();
    out.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap());
    out
}

fn fuse_weighted(
    semantic: &[SemanticResult],
    keyword: &[KeywordResult],
    vector_weight: f64,
    keyword_weight: f64,
) -> Vec<HybridResult> {
    let max_bm25 = keyword.iter().map(|r| r.score).fold(f64::MIN, f64::max);
    let min_bm25 = keyword.iter().map(|r| r.score).fold(f64::MAX, f64::min);
    let span = max_bm25 - min_bm25;

    let mut scores: HashMap<(String, String), (f64, Option<f64>, Option<f64>)> = HashMap::new();
    for r in semantic {
        let key = (r.source.clone(), r.text.clone());
        scores.insert(key, (r.score * vector_weight, Some(r.score), None));
    }
    for r in keyword {
        let normalized = if span > 0.0 {
            (max_bm25 - r.score) / span
        } else {
            1.0
        };
        let key = (r.source.clone(), r.text.clone());
        let entry = scores.entry(key).or_insert((0.0, None, None));
        entry.0 += normalized * keyword_weight;
        entry.2 = Some(r.score);
    }

    let mut out: Vec<HybridResult> = scores
        .into_iter()
        .map(|((source, text), (combined, vscore, kscore))| HybridResult {
            id: format!("{source}:{}", content_hash(&text)),
            source,
            text,
            vector_score: vscore,
            keyword_score: kscore,
            rrf_score: combined,
        })
        .collect();
    out.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap());
    debug!(count = out.len(), "weighted fusion complete");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sections_breaks_on_h2_headers() {
        let content = "## one\nfirst section text here that is long enough\n## two\nsecond section text that is also long enough";
        let sections = split_sections(content);
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn tokenize_drops_punctuation() {
        let tokens = tokenize("hello, world! 안녕하세요?");
        assert!(tokens.contains(&"hello".to_string()));
        assert!(tokens.contains(&"world".to_string()));
        assert!(tokens.iter().any(|t| t.contains('안')));
    }

    #[test]
    fn vec_roundtrips_through_blob_serialization() {
        let v = vec![0.1_f32, -0.2, 0.3];
        let blob = serialize_vec(&v);
        let back = deserialize_vec(&blob);
        for (a, b) in v.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    fn test_store() -> Arc<ChunkStore> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let embedding = Arc::new(crate::embedding::EmbeddingEngine::new());
        Arc::new(ChunkStore::new(conn, embedding))
    }

    #[tokio::test]
    async fn hybrid_search_finds_an_ingested_chunk_by_keyword() {
        let store = test_store();
        store
            .ingest_source("notes.md", "## topic\nthe quick brown fox jumps over the lazy dog", 0)
            .unwrap();

        let results = store
            .clone()
            .hybrid_search("brown fox", &HybridOptions::default())
            .await
            .unwrap();
        assert!(results.iter().any(|r| r.text.contains("brown fox")));
    }

    #[tokio::test]
    async fn hybrid_search_on_empty_store_returns_empty() {
        let store = test_store();
        let results = store
            .clone()
            .hybrid_search("anything", &HybridOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
