//! 模型驻留与内存预算管理

pub mod residency;

pub use residency::{MemoryStats, ModelResidencyManager};
