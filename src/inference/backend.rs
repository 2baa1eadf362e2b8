//! 推理服务网关抽象
//!
//! 定义访问外部推理服务的统一接口。驻留管理器与查询引擎只依赖这个 trait，
//! 具体实现见 [`crate::inference::backends`]。

use crate::api::request::ChatMessage;
use crate::Result;
use async_trait::async_trait;

/// 推理网关 trait
///
/// 所有方法都可能因网络问题失败，调用方自行决定是否重试。
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// 网关名称
    fn name(&self) -> &str;

    /// 单次聊天请求
    ///
    /// # 参数
    /// - `model`: 模型名称
    /// - `messages`: 按顺序排列的消息
    ///
    /// # 返回
    /// 模型回复文本
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;

    /// 确保远端已拉取/注册模型
    ///
    /// 远端拒绝时返回 `Ok(false)`，网络失败返回错误。
    async fn pull(&self, model: &str) -> Result<bool>;

    /// 列出远端已知的模型名称
    async fn list(&self) -> Result<Vec<String>>;

    /// 服务是否可达
    async fn health(&self) -> bool {
        self.list().await.is_ok()
    }
}
