use std::sync::Arc;

use rusqlite::Connection;

use crate::db;
use crate::embedding::EmbeddingEngine;
use crate::error::Result;
use crate::store::{ChunkStore, HybridOptions};
use crate::types::{HybridResult, KeywordResult, SearchFilters, SemanticResult};

/// Facade over the embedding engine (4.B) and chunk store (4.C) — the
/// single handle `attendant-agent` holds for memory retrieval.
///
/// Thread-safe: the connection lives behind `ChunkStore`'s internal mutex,
/// the same shape as a `MemoryManager` wrapping a `Mutex<Connection>`.
pub struct MemoryManager {
    embedding: Arc<EmbeddingEngine>,
    store: Arc<ChunkStore>,
}

impl MemoryManager {
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        let embedding = Arc::new(EmbeddingEngine::new());
        let store = Arc::new(ChunkStore::new(conn, embedding.clone()));
        Ok(Self { embedding, store })
    }

    /// Called once from the warmup coordinator (4.M): loads the embedding
    /// pipeline and primes it against a probe string so the first real
    /// query doesn't pay that cost.
    pub fn warm_up(&self) -> Result<()> {
        self.embedding.preload()
    }

    pub fn ingest_source(&self, source: &str, content: &str, mtime: i64) -> Result<usize> {
        self.store.ingest_source(source, content, mtime)
    }

    pub fn delete_by_source(&self, source: &str) -> Result<()> {
        self.store.delete_by_source(source)
    }

    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<SemanticResult>> {
        let query_vec = self.embedding.embed(query, true);
        self.store.search(&query_vec, top_k, min_score, filters)
    }

    pub fn search_keyword(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<KeywordResult>> {
        self.store.search_keyword(query, k, filters)
    }

    pub async fn hybrid_search(
        &self,
        query: &str,
        opts: &HybridOptions,
    ) -> Result<Vec<HybridResult>> {
        Arc::clone(&self.store).hybrid_search(query, opts).await
    }
}
