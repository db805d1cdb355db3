//! Kernel error types.
//!
//! Only genuinely recoverable conditions get an error value; broken
//! invariants are panics by design (see the panic handler in the binary).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A page allocation could not be satisfied.
    OutOfMemory { requested_pages: usize },
    /// An argument was outside its documented domain.
    InvalidArgument { name: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested_pages } => {
                write!(f, "out of memory ({requested_pages} pages requested)")
            }
            KernelError::InvalidArgument { name } => {
                write!(f, "invalid argument: {name}")
            }
        }
    }
}
