pub mod engine;
pub mod regression;
pub mod scheduler;
pub mod ticker;

// Re-export commonly used types
pub use engine::{fingerprint, EngineContext, QueryEngine, QueryJob, Submission};
pub use scheduler::{AdaptiveBatchScheduler, BatchItem, BatchPerformanceSample, PendingRequest};
pub use ticker::BatchTicker;
