use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

/// 未能从模型输出中解析置信度时使用的默认值
pub const DEFAULT_CONFIDENCE: f32 = 0.7;

static CONFIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)confidence\D*?(\d+(?:\.\d+)?)").expect("invalid confidence pattern")
});

/// 推理响应（缓存的负载）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub text: String,
    pub model: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl QueryResponse {
    /// 由模型原始输出构造响应，并解析其中的置信度
    pub fn from_model_output(model: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let confidence = parse_confidence(&text).unwrap_or(DEFAULT_CONFIDENCE);
        Self {
            text,
            model: model.into(),
            confidence,
            created_at: Utc::now(),
        }
    }
}

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    /// 精确缓存命中
    Exact,
    /// 语义相似命中
    Semantic,
    /// 新完成的推理
    Inferred,
}

/// 查询结果
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: QueryResponse,
    pub hit: HitKind,
    /// 语义命中时的相似度
    pub similarity: Option<f32>,
    pub processing_time: Duration,
}

/// 从形如 "Confidence: 85%" 或 "confidence 0.9" 的行中提取置信度
pub fn parse_confidence(text: &str) -> Option<f32> {
    text.lines()
        .find_map(|line| CONFIDENCE.captures(line))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|v| if v > 1.0 { v / 100.0 } else { v })
        .map(|v| v.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confidence() {
        assert_eq!(parse_confidence("Answer\nConfidence: 0.9"), Some(0.9));
        assert_eq!(parse_confidence("Confidence level 85%"), Some(0.85));
        assert_eq!(parse_confidence("no score here"), None);
        assert_eq!(parse_confidence("confidence is high"), None);
        assert_eq!(parse_confidence("Q3 confidence: 0.82"), Some(0.82));
    }

    #[test]
    fn test_default_confidence() {
        let resp = QueryResponse::from_model_output("tinyllama", "Revenue grew 12%.");
        assert_eq!(resp.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(resp.model, "tinyllama");
    }
}
