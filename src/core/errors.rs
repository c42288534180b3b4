/*!
 * Error Types
 * Gateway errors and their single translation into errno
 */

use miette::Diagnostic;
use thiserror::Error;

use crate::abi::errno::Errno;
use crate::core::types::Fd;
use crate::native::NativeError;

/// Everything a gateway operation can fail with
///
/// Native errors pass through untouched until `errno()` translates them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SyscallError {
    #[error("native operation failed: {0}")]
    #[diagnostic(code(shim::native))]
    Native(#[from] NativeError),

    #[error("bad file descriptor {0}")]
    #[diagnostic(
        code(shim::bad_descriptor),
        help("The descriptor is not open or belongs to a different kind of object.")
    )]
    BadDescriptor(Fd),

    #[error("invalid user pointer")]
    #[diagnostic(code(shim::fault))]
    Fault,

    #[error("address buffer holds {len} bytes, need {need}")]
    #[diagnostic(
        code(shim::address_too_small),
        help("Pass a buffer of at least sizeof(struct sockaddr_in).")
    )]
    AddressTooSmall { len: usize, need: usize },

    #[error("invalid argument: {0}")]
    #[diagnostic(code(shim::invalid_argument))]
    InvalidArgument(&'static str),

    #[error("unsupported: {0}")]
    #[diagnostic(
        code(shim::unsupported),
        help("The native runtime has no equivalent; the request is rejected as a whole.")
    )]
    Unsupported(&'static str),

    #[error("not implemented: {0}")]
    #[diagnostic(code(shim::not_implemented))]
    NotImplemented(&'static str),

    #[error("{table} table full")]
    #[diagnostic(
        code(shim::table_full),
        help("Close unused descriptors; table sizes are fixed at start-up.")
    )]
    TableFull { table: &'static str, errno: Errno },

    #[error("operation would block")]
    #[diagnostic(code(shim::would_block))]
    WouldBlock,

    #[error("{0}")]
    #[diagnostic(code(shim::posix))]
    Posix(Errno),
}

impl SyscallError {
    /// Create a table-full error reported as `EMFILE`
    #[inline]
    pub fn descriptors_exhausted(table: &'static str) -> Self {
        Self::TableFull {
            table,
            errno: Errno::EMFILE,
        }
    }

    /// Create a table-full error reported as `ENOMEM`
    #[inline]
    pub fn slots_exhausted(table: &'static str) -> Self {
        Self::TableFull {
            table,
            errno: Errno::ENOMEM,
        }
    }

    /// The POSIX image of this error
    pub fn errno(&self) -> Errno {
        match self {
            SyscallError::Native(code) => Errno::from(*code),
            SyscallError::BadDescriptor(_) => Errno::EBADF,
            SyscallError::Fault => Errno::EFAULT,
            SyscallError::AddressTooSmall { .. } => Errno::ENOMEM,
            SyscallError::InvalidArgument(_) => Errno::EINVAL,
            SyscallError::Unsupported(_) => Errno::ENOTSUP,
            SyscallError::NotImplemented(_) => Errno::ENOSYS,
            SyscallError::TableFull { errno, .. } => *errno,
            SyscallError::WouldBlock => Errno::EWOULDBLOCK,
            SyscallError::Posix(errno) => *errno,
        }
    }
}

impl From<Errno> for SyscallError {
    fn from(errno: Errno) -> Self {
        SyscallError::Posix(errno)
    }
}

/// Result of a gateway operation
pub type SyscallResult<T> = Result<T, SyscallError>;
