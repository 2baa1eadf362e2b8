//! 查询向量化
//!
//! [`TermVectorizer`] 按词项建立增量词表，输出固定维度的单位向量。
//! 向量化失败时由调用方退回 [`pseudo_embedding`]。

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// 向量化错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("No known terms in text")]
    NoKnownTerms,

    #[error("Invalid embedding dimension: {0}")]
    InvalidDimension(usize),
}

/// 文本向量化接口
///
/// 实现需保持确定性：相同的调用序列产生相同的向量。
pub trait Embedder: Send {
    /// 输出维度
    fn dimension(&self) -> usize;

    /// 返回单位长度向量
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "what", "with",
];

/// 词频向量化
///
/// 词表随输入增长，直到填满维度；之后未见过的词被忽略。
#[derive(Debug, Clone)]
pub struct TermVectorizer {
    dimension: usize,
    vocabulary: HashMap<String, usize>,
}

impl TermVectorizer {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vocabulary: HashMap::new(),
        }
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    fn index_of(&mut self, term: &str) -> Option<usize> {
        if let Some(&index) = self.vocabulary.get(term) {
            return Some(index);
        }
        if self.vocabulary.len() >= self.dimension {
            return None;
        }
        let index = self.vocabulary.len();
        self.vocabulary.insert(term.to_string(), index);
        Some(index)
    }
}

impl Embedder for TermVectorizer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::InvalidDimension(0));
        }

        let mut vector = vec![0.0f32; self.dimension];
        let mut matched = false;
        for term in tokenize(text) {
            if let Some(index) = self.index_of(&term) {
                vector[index] += 1.0;
                matched = true;
            }
        }

        if !matched {
            return Err(EmbeddingError::NoKnownTerms);
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// 小写、按非字母数字切分并去除停用词
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
}

/// 由 SHA-256 派生的固定维度伪向量
pub fn pseudo_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = Vec::with_capacity(dimension);
    let mut counter: u32 = 0;
    while vector.len() < dimension {
        let digest = Sha256::new()
            .chain_update(text.as_bytes())
            .chain_update(counter.to_le_bytes())
            .finalize();
        vector.extend(
            digest
                .iter()
                .take(dimension - vector.len())
                .map(|&b| f32::from(b) / 127.5 - 1.0),
        );
        counter += 1;
    }
    normalize(&mut vector);
    vector
}

/// 原地归一化为单位长度，零向量保持不变
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_vectors_are_unit_length() {
        let mut vectorizer = TermVectorizer::new(16);
        let v = vectorizer.embed("What is the revenue forecast for Q3?").unwrap();
        assert_eq!(v.len(), 16);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let same = vectorizer.embed("revenue FORECAST q3").unwrap();
        assert!((cosine(&v, &same) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_no_known_terms() {
        let mut vectorizer = TermVectorizer::new(2);
        assert_eq!(vectorizer.embed("the of and"), Err(EmbeddingError::NoKnownTerms));

        vectorizer.embed("sales margin").unwrap();
        assert_eq!(vectorizer.vocabulary_size(), 2);
        // 词表已满
        assert_eq!(vectorizer.embed("inventory"), Err(EmbeddingError::NoKnownTerms));
    }

    #[test]
    fn test_pseudo_embedding() {
        let a = pseudo_embedding("inventory", 100);
        let b = pseudo_embedding("inventory", 100);
        assert_eq!(a.len(), 100);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_ne!(a, pseudo_embedding("payroll", 100));
    }

    #[test]
    fn test_cosine_mismatched_or_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[0.8, 0.6]) - 0.8).abs() < 1e-6);
    }
}
