//! 查询缓存

pub mod embedding;
pub mod semantic;

pub use embedding::{Embedder, EmbeddingError, TermVectorizer};
pub use semantic::{CacheLookup, CacheStats, SemanticQueryCache};
