//! 语义查询缓存
//!
//! 精确键命中优先；否则按余弦相似度匹配已缓存查询。
//! 容量满时一次性移除最久未访问的 20% 条目。

use crate::api::response::QueryResponse;
use crate::cache::embedding::{cosine, pseudo_embedding, Embedder, TermVectorizer};
use crate::config::CacheConfig;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;

/// 键与指纹之间的分隔符
const KEY_SEPARATOR: char = '\u{1f}';

const QUERY_SAMPLE_CHARS: usize = 100;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: QueryResponse,
    pub confidence: f32,
    pub embedding: Vec<f32>,
    pub access_count: u64,
    pub last_accessed: Instant,
    /// 单调访问序号，用于淘汰排序
    access_tick: u64,
    pub quality_score: f32,
    pub context_fingerprint: String,
    pub query_sample: String,
}

/// 查找结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Exact(QueryResponse),
    Semantic {
        response: QueryResponse,
        similarity: f32,
    },
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheLookup::Miss)
    }
}

/// 缓存统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub total_accesses: u64,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub average_quality: f32,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    embedder: Box<dyn Embedder>,
    similarity_threshold: f32,
    tick: u64,
    exact_hits: u64,
    semantic_hits: u64,
    misses: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn embed(&mut self, normalized: &str) -> Vec<f32> {
        match self.embedder.embed(normalized) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::debug!("Vectorization failed ({}), using hash embedding", e);
                pseudo_embedding(normalized, self.embedder.dimension())
            }
        }
    }

    fn touch(&mut self, key: &str) -> Option<QueryResponse> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = Instant::now();
        entry.access_tick = tick;
        Some(entry.response.clone())
    }
}

/// 语义查询缓存
///
/// 所有状态由同一把锁保护，`store` 与 `lookup` 不会观察到淘汰到一半的缓存。
pub struct SemanticQueryCache {
    state: Mutex<CacheState>,
    capacity: usize,
    require_same_context: bool,
}

impl SemanticQueryCache {
    /// 使用默认词频向量化创建
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_embedder(config, Box::new(TermVectorizer::new(config.embedding_dim)))
    }

    pub fn with_embedder(config: &CacheConfig, embedder: Box<dyn Embedder>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                embedder,
                similarity_threshold: config.similarity_threshold,
                tick: 0,
                exact_hits: 0,
                semantic_hits: 0,
                misses: 0,
            }),
            capacity: config.capacity.max(1),
            require_same_context: config.require_same_context,
        }
    }

    /// 查找缓存
    pub fn lookup(&self, query: &str, context_fingerprint: &str) -> CacheLookup {
        let normalized = normalize_query(query);
        let key = cache_key(&normalized, context_fingerprint);

        let mut state = self.state.lock();
        let embedding = state.embed(&normalized);

        if let Some(response) = state.touch(&key) {
            state.exact_hits += 1;
            tracing::debug!("Exact cache hit for key {}", &key[..12]);
            return CacheLookup::Exact(response);
        }

        let threshold = state.similarity_threshold;
        let best = state
            .entries
            .iter()
            .filter(|(_, entry)| {
                !self.require_same_context || entry.context_fingerprint == context_fingerprint
            })
            .map(|(key, entry)| (key, cosine(&embedding, &entry.embedding)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, similarity)| (key.clone(), similarity));

        match best {
            Some((key, similarity)) => match state.touch(&key) {
                Some(response) => {
                    state.semantic_hits += 1;
                    tracing::debug!("Semantic cache hit (similarity: {:.3})", similarity);
                    CacheLookup::Semantic {
                        response,
                        similarity,
                    }
                }
                None => {
                    state.misses += 1;
                    CacheLookup::Miss
                }
            },
            None => {
                state.misses += 1;
                CacheLookup::Miss
            }
        }
    }

    /// 写入缓存
    pub fn store(&self, query: &str, context_fingerprint: &str, response: QueryResponse) {
        let normalized = normalize_query(query);
        let key = cache_key(&normalized, context_fingerprint);

        let mut state = self.state.lock();
        let embedding = state.embed(&normalized);
        let tick = state.next_tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            self.evict_oldest(&mut state);
        }

        let confidence = response.confidence;
        state.entries.insert(
            key,
            CacheEntry {
                response,
                confidence,
                embedding,
                access_count: 1,
                last_accessed: Instant::now(),
                access_tick: tick,
                quality_score: confidence,
                context_fingerprint: context_fingerprint.to_string(),
                query_sample: query.chars().take(QUERY_SAMPLE_CHARS).collect(),
            },
        );
    }

    /// 一次性移除最久未访问的 20%（至少一条）
    fn evict_oldest(&self, state: &mut CacheState) {
        let count = (state.entries.len() / 5).max(1);
        let mut by_age: Vec<(u64, String)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.access_tick, key.clone()))
            .collect();
        by_age.sort_unstable();

        for (_, key) in by_age.into_iter().take(count) {
            state.entries.remove(&key);
        }
        tracing::info!("Cache evicted {} entries", count);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.exact_hits + state.semantic_hits + state.misses;
        let size = state.entries.len();
        let average_quality = if size == 0 {
            0.0
        } else {
            state.entries.values().map(|e| e.quality_score).sum::<f32>() / size as f32
        };

        CacheStats {
            size,
            capacity: self.capacity,
            total_accesses: state.entries.values().map(|e| e.access_count).sum(),
            exact_hits: state.exact_hits,
            semantic_hits: state.semantic_hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (state.exact_hits + state.semantic_hits) as f64 / lookups as f64
            },
            average_quality,
        }
    }

    pub fn set_similarity_threshold(&self, threshold: f32) {
        self.state.lock().similarity_threshold = threshold;
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.state.lock().similarity_threshold
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 去首尾空白、折叠连续空白并转小写
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256（规范化查询 + 上下文指纹）的十六进制
pub fn cache_key(normalized_query: &str, context_fingerprint: &str) -> String {
    let digest = Sha256::new()
        .chain_update(normalized_query.as_bytes())
        .chain_update(KEY_SEPARATOR.to_string().as_bytes())
        .chain_update(context_fingerprint.as_bytes())
        .finalize();
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::embedding::EmbeddingError;

    /// 按文本返回固定向量
    struct FixedEmbedder(HashMap<String, Vec<f32>>);

    impl Embedder for FixedEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.0.get(text).cloned().ok_or(EmbeddingError::NoKnownTerms)
        }
    }

    fn config(capacity: usize) -> CacheConfig {
        CacheConfig {
            capacity,
            ..CacheConfig::default()
        }
    }

    fn response(text: &str) -> QueryResponse {
        QueryResponse::from_model_output("tinyllama", text)
    }

    #[test]
    fn test_exact_hit_is_deterministic() {
        let cache = SemanticQueryCache::new(&config(10));
        cache.store("Total revenue in March?", "ctx-1", response("42"));

        for _ in 0..3 {
            match cache.lookup("  total REVENUE in   march?", "ctx-1") {
                CacheLookup::Exact(r) => assert_eq!(r.text, "42"),
                other => panic!("expected exact hit, got {:?}", other),
            }
        }
        assert_eq!(cache.stats().exact_hits, 3);
        assert_eq!(cache.stats().total_accesses, 4);
    }

    #[test]
    fn test_context_changes_key() {
        assert_ne!(cache_key("q", "a"), cache_key("q", "b"));
        assert_eq!(cache_key("q", "a").len(), 64);
    }

    #[test]
    fn test_similarity_threshold() {
        let vectors = HashMap::from([
            ("stored".to_string(), vec![1.0, 0.0]),
            ("probe".to_string(), vec![0.8, 0.6]),
        ]);
        let cache = SemanticQueryCache::with_embedder(&config(10), Box::new(FixedEmbedder(vectors)));
        cache.store("stored", "ctx", response("cached answer"));

        assert_eq!(cache.lookup("probe", "other"), CacheLookup::Miss);

        cache.set_similarity_threshold(0.75);
        match cache.lookup("probe", "other") {
            CacheLookup::Semantic {
                response,
                similarity,
            } => {
                assert_eq!(response.text, "cached answer");
                assert!((similarity - 0.8).abs() < 1e-6);
            }
            other => panic!("expected semantic hit, got {:?}", other),
        }
    }

    #[test]
    fn test_require_same_context() {
        let vectors = HashMap::from([
            ("stored".to_string(), vec![1.0, 0.0]),
            ("probe".to_string(), vec![0.8, 0.6]),
        ]);
        let cfg = CacheConfig {
            similarity_threshold: 0.75,
            require_same_context: true,
            ..config(10)
        };
        let cache = SemanticQueryCache::with_embedder(&cfg, Box::new(FixedEmbedder(vectors)));
        cache.store("stored", "ctx", response("cached answer"));

        assert_eq!(cache.lookup("probe", "other"), CacheLookup::Miss);
        assert!(cache.lookup("probe", "ctx").is_hit());
    }

    #[test]
    fn test_bulk_eviction() {
        let cache = SemanticQueryCache::new(&config(10));
        for i in 0..10 {
            cache.store(&format!("query number{}", i), "ctx", response("r"));
        }
        assert_eq!(cache.len(), 10);

        // 最早写入的 query number0 被访问后不应被淘汰
        assert!(matches!(cache.lookup("query number0", "ctx"), CacheLookup::Exact(_)));

        cache.store("one more", "ctx", response("r"));
        assert_eq!(cache.len(), 9);
        assert!(matches!(cache.lookup("query number0", "ctx"), CacheLookup::Exact(_)));
        assert!(!matches!(cache.lookup("query number1", "ctx"), CacheLookup::Exact(_)));
        assert!(!matches!(cache.lookup("query number2", "ctx"), CacheLookup::Exact(_)));
        assert!(matches!(cache.lookup("query number3", "ctx"), CacheLookup::Exact(_)));
    }

    #[test]
    fn test_overwrite_existing_key_does_not_evict() {
        let cache = SemanticQueryCache::new(&config(2));
        cache.store("alpha", "ctx", response("1"));
        cache.store("beta", "ctx", response("2"));
        cache.store("alpha", "ctx", response("3"));
        assert_eq!(cache.len(), 2);
        match cache.lookup("alpha", "ctx") {
            CacheLookup::Exact(r) => assert_eq!(r.text, "3"),
            other => panic!("expected exact hit, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_embedding_never_fails() {
        let cache = SemanticQueryCache::new(&CacheConfig {
            embedding_dim: 1,
            ..config(10)
        });
        cache.store("alpha", "ctx", response("1"));
        // 词表已满，走哈希伪向量
        cache.store("omega", "ctx", response("2"));
        assert_eq!(cache.len(), 2);
        assert!(matches!(cache.lookup("omega", "ctx"), CacheLookup::Exact(_)));
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = SemanticQueryCache::new(&config(10));
        cache.store("inventory levels", "ctx", response("Confidence: 0.9"));
        assert!(cache.lookup("inventory levels", "ctx").is_hit());
        assert_eq!(cache.lookup("payroll", "ctx"), CacheLookup::Miss);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert!((stats.average_quality - 0.9).abs() < 1e-6);

        cache.clear();
        assert!(cache.is_empty());
    }
}
