//! Architecture support.
//!
//! Everything CPU-specific the kernel touches goes through this module.
//! On the bare-metal target the primitives are `extern "C"` contracts
//! fulfilled by the loader object (see [`x86::stubs`]); on the host build
//! they are replaced by shims so the architecture-independent logic can be
//! exercised by the standard test harness.

#[cfg(target_os = "none")]
pub mod x86;

#[cfg(target_os = "none")]
pub use x86::{
    disable_interrupts, enable_interrupts, halt, interrupts_enabled, stack_pointer,
    switch_context,
};

#[cfg(not(target_os = "none"))]
mod host;

#[cfg(not(target_os = "none"))]
pub use host::{
    context_switch_count, disable_interrupts, enable_interrupts, halt, interrupts_enabled,
    switch_context,
};
