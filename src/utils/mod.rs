pub mod logging;

pub use logging::{init_logging, init_logging_from_env};
