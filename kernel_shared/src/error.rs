use core::fmt::Display;

use crate::{board::BoardLayoutError, object::TypeId};

/// Recoverable kernel failures. Invariant violations are bug checks, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The heap could not satisfy a request, even after a collection.
    OutOfMemory { requested: usize },
    /// The linked garbage collector does not implement the operation.
    UnsupportedOperation(&'static str),
    /// The board layout did not contain any range usable as heap.
    NoHeapSegments,
    UnknownType(TypeId),
    InvalidStackSize(usize),
    InvalidLayout(BoardLayoutError),
}

impl Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::OutOfMemory { requested } => {
                write!(f, "out of memory allocating {} bytes", requested)
            }
            KernelError::UnsupportedOperation(operation) => {
                write!(f, "{} is not supported by the active collector", operation)
            }
            KernelError::NoHeapSegments => write!(f, "no heap ranges in the board layout"),
            KernelError::UnknownType(id) => write!(f, "no type descriptor for {}", id),
            KernelError::InvalidStackSize(size) => write!(f, "invalid stack size {}", size),
            KernelError::InvalidLayout(error) => write!(f, "invalid board layout: {:?}", error),
        }
    }
}

impl core::error::Error for KernelError {}

impl From<BoardLayoutError> for KernelError {
    fn from(error: BoardLayoutError) -> Self {
        KernelError::InvalidLayout(error)
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
