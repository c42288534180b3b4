/*!
 * POSIX Shim Library
 * Linux syscall translation for a C library running on a capability-based
 * microkernel
 */

pub mod abi;
pub mod config;
pub mod core;
pub mod ffi;
pub mod logging;
pub mod native;
pub mod syscalls;

// Re-exports
pub use abi::{Errno, Sysno};
pub use config::{FdLayout, FdRange, ShimConfig, UnameInfo};
pub use self::core::{Fd, SyscallArgs, SyscallError, SyscallResult};
pub use logging::init_tracing;
pub use native::{Collaborators, NativeError};
pub use syscalls::{Descriptor, Dispatcher, TraceEntry};
