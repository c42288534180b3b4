/*!
 * Core Types
 * Common types used across the shim
 */

/// Descriptor number as the C library sees it
pub type Fd = i32;

/// Raw syscall argument (one register)
pub type Word = usize;

/// The six register arguments of a syscall
pub type SyscallArgs = [Word; 6];
