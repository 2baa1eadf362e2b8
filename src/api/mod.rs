pub mod error;
pub mod request;
pub mod response;

pub use error::{FerrousMoatError, Result};
pub use request::{ChatMessage, QueryRequest, Urgency};
pub use response::{HitKind, QueryOutcome, QueryResponse};
