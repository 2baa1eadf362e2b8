//! Ollama 网关实现
//!
//! 通过 HTTP 调用 Ollama 兼容服务：
//! - `POST /api/chat`：非流式聊天
//! - `POST /api/pull`：拉取模型
//! - `GET /api/tags`：列出模型
//! - `GET /`：存活检查

use crate::api::error::InferenceError;
use crate::api::request::ChatMessage;
use crate::config::GatewayConfig;
use crate::inference::backend::InferenceGateway;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama 网关
#[derive(Debug, Clone)]
pub struct OllamaGateway {
    client: Client,
    base_url: String,
    chat_timeout: Duration,
    pull_timeout: Duration,
    list_timeout: Duration,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatReply {
    message: ChatMessage,
}

#[derive(Serialize)]
struct PullPayload<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaGateway {
    /// 从配置创建
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| InferenceError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_timeout: Duration::from_secs(config.chat_timeout_secs),
            pull_timeout: Duration::from_secs(config.pull_timeout_secs),
            list_timeout: Duration::from_secs(config.list_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl InferenceGateway for OllamaGateway {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let payload = ChatPayload {
            model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(self.url("/api/chat"))
            .timeout(self.chat_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Ollama chat error: {}", e);
                InferenceError::from(e)
            })?;

        if !response.status().is_success() {
            return Err(InferenceError::Failed(format!(
                "Ollama returned {} for model {}",
                response.status(),
                model
            ))
            .into());
        }

        let reply: ChatReply = response.json().await.map_err(InferenceError::from)?;
        Ok(reply.message.content)
    }

    async fn pull(&self, model: &str) -> Result<bool> {
        tracing::info!("Pulling model: {}", model);

        let response = self
            .client
            .post(self.url("/api/pull"))
            .timeout(self.pull_timeout)
            .json(&PullPayload {
                name: model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Model pull error: {}", e);
                InferenceError::from(e)
            })?;

        Ok(response.status().is_success())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.list_timeout)
            .send()
            .await
            .map_err(InferenceError::from)?;

        if !response.status().is_success() {
            return Err(InferenceError::Failed(format!(
                "Ollama returned {} listing models",
                response.status()
            ))
            .into());
        }

        let tags: TagsReply = response.json().await.map_err(InferenceError::from)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn health(&self) -> bool {
        match self
            .client
            .get(self.url("/"))
            .timeout(self.list_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!("Ollama status check failed: {}", e);
                false
            }
        }
    }
}
