use crate::shape::Shape;
use crate::variable::VariableId;

/// Every failure mode of the crate.
///
/// Configuration errors are raised by constructors and `validate()` before any
/// data flows. Shape errors are raised by forward/backward/initialize and
/// indicate a wiring bug in the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// A storage slot was read before anything was written to it.
    #[error("variable {id} has no allocated {slot}")]
    Unallocated { id: VariableId, slot: &'static str },

    #[error("network is not initialized")]
    Uninitialized,

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;
