use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 请求紧急程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    High,
}

/// 自然语言查询请求
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    /// 调用方计算的上下文指纹，参与缓存键
    pub context_fingerprint: String,
    /// 附加给模型的上下文文本（不参与缓存键）
    pub context: Option<String>,
    pub task_hint: String,
    pub urgency: Urgency,
    /// 显式指定模型，覆盖自动选择
    pub model: Option<String>,
    /// 等待推理结果的截止时间
    pub deadline: Option<Duration>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, context_fingerprint: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context_fingerprint: context_fingerprint.into(),
            context: None,
            task_hint: "general".to_string(),
            urgency: Urgency::Normal,
            model: None,
            deadline: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_task(mut self, task_hint: impl Into<String>) -> Self {
        self.task_hint = task_hint.into();
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
