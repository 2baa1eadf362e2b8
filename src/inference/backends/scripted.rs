//! 内存网关
//!
//! 不访问网络，按固定规则回复，适合测试与离线运行。

use crate::api::error::InferenceError;
use crate::api::request::ChatMessage;
use crate::inference::backend::InferenceGateway;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 回复为 `"[model] <最后一条用户消息>"` 的内存网关
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    known: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    replies: Mutex<HashMap<String, String>>,
    delay: Duration,
    chat_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    calls_per_model: Mutex<HashMap<String, usize>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置远端已知的模型
    pub fn with_models<I, S>(self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.lock().extend(models.into_iter().map(Into::into));
        self
    }

    /// 每次 chat 调用的人为延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 让指定模型的所有请求失败
    pub fn fail_model(&self, model: &str) {
        self.failing.lock().insert(model.to_string());
    }

    pub fn recover_model(&self, model: &str) {
        self.failing.lock().remove(model);
    }

    /// 为某条用户消息设置固定回复
    pub fn set_reply(&self, prompt: &str, reply: &str) {
        self.replies.lock().insert(prompt.to_string(), reply.to_string());
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls_for(&self, model: &str) -> usize {
        self.calls_per_model.lock().get(model).copied().unwrap_or(0)
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_per_model.lock().entry(model.to_string()).or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.lock().contains(model) {
            return Err(InferenceError::Unavailable(format!("{} is failing", model)).into());
        }
        if !self.known.lock().contains(model) {
            return Err(InferenceError::Failed(format!("model '{}' not found", model)).into());
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if let Some(reply) = self.replies.lock().get(&prompt) {
            return Ok(reply.clone());
        }
        Ok(format!("[{}] {}", model, prompt))
    }

    async fn pull(&self, model: &str) -> Result<bool> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(model) {
            return Ok(false);
        }
        self.known.lock().insert(model.to_string());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut models: Vec<String> = self.known.lock().iter().cloned().collect();
        models.sort();
        Ok(models)
    }
}
