//! 具体网关实现

pub mod ollama;
pub mod scripted;

pub use ollama::OllamaGateway;
pub use scripted::ScriptedGateway;
