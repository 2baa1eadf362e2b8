pub mod descriptor;

// Re-export commonly used types
pub use descriptor::{ModelDescriptor, ModelStatus};
