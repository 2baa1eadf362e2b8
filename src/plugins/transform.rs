//! 查询与响应变换
//!
//! 在查询进入缓存与推理之前、以及响应返回之前挂载的处理步骤。
//! [`PiiRedactor`] 只做模式替换，不构成隐私保证。

use crate::api::response::QueryResponse;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// 变换接口
pub trait QueryTransform: Send + Sync {
    fn name(&self) -> &str;

    /// 处理进入管道的查询文本
    fn sanitize_query<'a>(&self, query: &'a str) -> Cow<'a, str>;

    /// 处理返回给调用方的响应
    fn on_response(&self, response: QueryResponse) -> QueryResponse {
        response
    }
}

/// 不做任何处理
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransform;

impl QueryTransform for NoopTransform {
    fn name(&self) -> &str {
        "noop"
    }

    fn sanitize_query<'a>(&self, query: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(query)
    }
}

struct PiiPattern {
    regex: Regex,
    replacement: &'static str,
}

impl PiiPattern {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("invalid pii pattern"),
            replacement,
        }
    }
}

// 顺序有意义：SSN 与电话号码格式相近，需先匹配 SSN
static PII_PATTERNS: LazyLock<Vec<PiiPattern>> = LazyLock::new(|| {
    vec![
        PiiPattern::new(r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
        PiiPattern::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b", "[CARD]"),
        PiiPattern::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "[EMAIL]"),
        PiiPattern::new(r"\b\d{3}-\d{3}-\d{4}\b", "[PHONE]"),
    ]
});

/// 替换查询中的 SSN、卡号、邮箱与电话号码
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    pub fn new() -> Self {
        Self
    }
}

impl QueryTransform for PiiRedactor {
    fn name(&self) -> &str {
        "pii-redactor"
    }

    fn sanitize_query<'a>(&self, query: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(query);
        for pattern in PII_PATTERNS.iter() {
            if pattern.regex.is_match(&result) {
                result = Cow::Owned(
                    pattern
                        .regex
                        .replace_all(&result, pattern.replacement)
                        .into_owned(),
                );
            }
        }
        if matches!(result, Cow::Owned(_)) {
            tracing::debug!("Redacted personal data from query");
        }
        result
    }
}
