/*!
 * Core Module
 * Fundamental shim types, limits and error handling
 */

pub mod errors;
pub mod limits;
pub mod slots;
pub mod types;

// Re-export for convenience
pub use errors::{SyscallError, SyscallResult};
pub use slots::Slots;
pub use types::*;
