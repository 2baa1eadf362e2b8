pub mod backend;
pub mod backends;
pub mod hardware;

// Re-export commonly used types
pub use backend::InferenceGateway;
pub use backends::{OllamaGateway, ScriptedGateway};
pub use hardware::{
    CapabilityTier, FixedLoad, HardwareProfile, HardwareProfiler, LoadMonitor, LoadSample,
    SystemLoadMonitor,
};
