//! 可插拔的查询处理扩展

pub mod transform;

pub use transform::{NoopTransform, PiiRedactor, QueryTransform};
