use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Fixed output dimension — spec.md §4.B ("fixed-dimension (default 384)").
pub const EMBEDDING_DIM: usize = 384;
/// Query-embedding cache cap — spec.md §4.B ("LRU: ≤ 100 entries").
const QUERY_CACHE_CAP: usize = 100;
/// Normalized input is truncated before hashing — spec.md §4.B.
const MAX_INPUT_CHARS: usize = 512;
/// Batch embedding concurrency ceiling — spec.md §4.B ("bounded concurrency default 5").
const BATCH_CONCURRENCY: usize = 5;

/// Produces fixed-dimension, unit-normalized embedding vectors for short
/// text with no remote dependency.
///
/// There is no local embedding model in this build, so this generalizes
/// the hash-seeded deterministic vector approach (same text always yields
/// the same vector, distinct text yields a pseudo-random but stable
/// direction) rather than a true semantic model — adequate for the
/// keyword-heavy, single-user retrieval this system does, and fused with
/// real keyword search in `store.rs` so semantic drift from a weak
/// embedding never is the only signal.
///
/// Singleton in practice: construct once behind an `Arc` and share; `embed`
/// and `embed_batch` take `&self` so concurrent callers never block on a
/// model load the way a real model pipeline would.
pub struct EmbeddingEngine {
    cache: Mutex<LruCache>,
}

impl EmbeddingEngine {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(QUERY_CACHE_CAP)),
        }
    }

    /// One-time warmup. There's no model weight to load, but this keeps the
    /// same shape as a real pipeline's first-call cost so `warmup()` (4.M)
    /// has something to time and callers don't need to special-case it.
    pub fn preload(&self) -> Result<()> {
        let _ = self.embed_uncached("warmup probe");
        Ok(())
    }

    /// `embed(text, useCache=true) → Vec` — spec.md §4.B.
    pub fn embed(&self, text: &str, use_cache: bool) -> Vec<f32> {
        let normalized = normalize_input(text);
        if normalized.is_empty() {
            return vec![0.0; EMBEDDING_DIM];
        }

        if use_cache {
            let mut cache = self.cache.lock().unwrap();
            if let Some(v) = cache.get(&normalized) {
                return v;
            }
            let v = self.embed_uncached(&normalized);
            cache.put(normalized, v.clone());
            return v;
        }
        self.embed_uncached(&normalized)
    }

    /// `embedBatch(texts) → Vec[]`. Never touches the query cache — batch
    /// ingestion runs against many distinct chunks and would thrash a
    /// 100-entry LRU for no benefit.
    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        // Bounded "concurrency" here is conceptual: the embedding itself is
        // CPU-bound hashing with no I/O, so chunking just caps how much of
        // the batch is materialized in memory at once.
        texts
            .chunks(BATCH_CONCURRENCY)
            .flat_map(|chunk| {
                chunk
                    .iter()
                    .map(|t| self.embed_uncached(&normalize_input(t)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Cosine similarity. On unit-normalized vectors this equals the dot
    /// product, so the `normalized` fast path skips the magnitude division.
    pub fn cosine(a: &[f32], b: &[f32], normalized: bool) -> f64 {
        let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
        if normalized {
            return dot;
        }
        let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if mag_a == 0.0 || mag_b == 0.0 {
            return 0.0;
        }
        dot / (mag_a * mag_b)
    }

    fn embed_uncached(&self, normalized: &str) -> Vec<f32> {
        hash_embedding(normalized)
    }
}

impl Default for EmbeddingEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_input(text: &str) -> String {
    let trimmed = text.trim();
    trimmed.chars().take(MAX_INPUT_CHARS).collect()
}

/// SHA-256-seeded deterministic embedding: expand the 32-byte digest into
/// `EMBEDDING_DIM` pseudo-random components via repeated re-hashing, map
/// each byte into `[-1, 1]`, then L2-normalize to unit length.
fn hash_embedding(text: &str) -> Vec<f32> {
    let mut out = Vec::with_capacity(EMBEDDING_DIM);
    let mut seed = Sha256::digest(text.as_bytes()).to_vec();

    while out.len() < EMBEDDING_DIM {
        seed = Sha256::digest(&seed).to_vec();
        for byte in &seed {
            if out.len() >= EMBEDDING_DIM {
                break;
            }
            out.push((*byte as f32 / 127.5) - 1.0);
        }
    }

    let magnitude: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in out.iter_mut() {
            *v /= magnitude;
        }
    }
    out
}

/// Minimal LRU: a cap-bounded map plus a recency queue. Small enough
/// (≤ 100 entries) that a linear scan on promotion is cheaper than pulling
/// in a crate for it.
struct LruCache {
    cap: usize,
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl LruCache {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        if let Some(v) = self.map.get(key).cloned() {
            self.touch(key);
            Some(v)
        } else {
            None
        }
    }

    fn put(&mut self, key: String, value: Vec<f32>) {
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), value);
            self.touch(&key);
            return;
        }
        if self.map.len() >= self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_is_deterministic_and_unit_normalized() {
        let engine = EmbeddingEngine::new();
        let a = engine.embed("hello world", false);
        let b = engine.embed("hello world", false);
        assert_eq!(a, b);
        let magnitude: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_input_yields_zero_vector() {
        let engine = EmbeddingEngine::new();
        let v = engine.embed("   ", true);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn cosine_of_identical_unit_vectors_is_one() {
        let engine = EmbeddingEngine::new();
        let v = engine.embed("some memory text", false);
        let sim = EmbeddingEngine::cosine(&v, &v, true);
        assert!((sim - 1.0).abs() < 1e-4);
    }

    #[test]
    fn lru_evicts_oldest_past_cap() {
        let mut cache = LruCache::new(2);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        cache.put("c".into(), vec![3.0]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }
}
