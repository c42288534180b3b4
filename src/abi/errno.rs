/*!
 * Errno Values
 * Linux errno numbers and the translation from native error codes
 */

use linux_raw_sys::errno;
use std::fmt;

use crate::native::NativeError;

/// A POSIX error number as the C library decodes it
///
/// The numeric value is the Linux one; syscalls hand it back negated.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(u32);

impl Errno {
    pub const EPERM: Errno = Errno(errno::EPERM);
    pub const ENOENT: Errno = Errno(errno::ENOENT);
    pub const EINTR: Errno = Errno(errno::EINTR);
    pub const EBADF: Errno = Errno(errno::EBADF);
    pub const EAGAIN: Errno = Errno(errno::EAGAIN);
    pub const EWOULDBLOCK: Errno = Errno(errno::EAGAIN);
    pub const ENOMEM: Errno = Errno(errno::ENOMEM);
    pub const EACCES: Errno = Errno(errno::EACCES);
    pub const EFAULT: Errno = Errno(errno::EFAULT);
    pub const EEXIST: Errno = Errno(errno::EEXIST);
    pub const EXDEV: Errno = Errno(errno::EXDEV);
    pub const ENOTDIR: Errno = Errno(errno::ENOTDIR);
    pub const EISDIR: Errno = Errno(errno::EISDIR);
    pub const EINVAL: Errno = Errno(errno::EINVAL);
    pub const EMFILE: Errno = Errno(errno::EMFILE);
    pub const ENOTTY: Errno = Errno(errno::ENOTTY);
    pub const ENAMETOOLONG: Errno = Errno(errno::ENAMETOOLONG);
    pub const ENOSPC: Errno = Errno(errno::ENOSPC);
    pub const ESPIPE: Errno = Errno(errno::ESPIPE);
    pub const ERANGE: Errno = Errno(errno::ERANGE);
    pub const ENOSYS: Errno = Errno(errno::ENOSYS);
    pub const ENOTEMPTY: Errno = Errno(errno::ENOTEMPTY);
    pub const ENOTSOCK: Errno = Errno(errno::ENOTSOCK);
    pub const EPROTONOSUPPORT: Errno = Errno(errno::EPROTONOSUPPORT);
    pub const ENOTSUP: Errno = Errno(errno::EOPNOTSUPP);
    pub const EAFNOSUPPORT: Errno = Errno(errno::EAFNOSUPPORT);
    pub const EADDRINUSE: Errno = Errno(errno::EADDRINUSE);
    pub const ECONNRESET: Errno = Errno(errno::ECONNRESET);
    pub const ENOTCONN: Errno = Errno(errno::ENOTCONN);
    pub const ETIMEDOUT: Errno = Errno(errno::ETIMEDOUT);
    pub const ECONNREFUSED: Errno = Errno(errno::ECONNREFUSED);

    /// Raw Linux errno value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Value a syscall returns to report this error
    #[inline]
    pub const fn as_ret(self) -> isize {
        -(self.0 as isize)
    }

    /// Symbolic name, for logs
    pub fn name(self) -> &'static str {
        match self.0 {
            errno::EPERM => "EPERM",
            errno::ENOENT => "ENOENT",
            errno::EINTR => "EINTR",
            errno::EBADF => "EBADF",
            errno::EAGAIN => "EAGAIN",
            errno::ENOMEM => "ENOMEM",
            errno::EACCES => "EACCES",
            errno::EFAULT => "EFAULT",
            errno::EEXIST => "EEXIST",
            errno::EXDEV => "EXDEV",
            errno::ENOTDIR => "ENOTDIR",
            errno::EISDIR => "EISDIR",
            errno::EINVAL => "EINVAL",
            errno::EMFILE => "EMFILE",
            errno::ENOTTY => "ENOTTY",
            errno::ENAMETOOLONG => "ENAMETOOLONG",
            errno::ENOSPC => "ENOSPC",
            errno::ESPIPE => "ESPIPE",
            errno::ERANGE => "ERANGE",
            errno::ENOSYS => "ENOSYS",
            errno::ENOTEMPTY => "ENOTEMPTY",
            errno::ENOTSOCK => "ENOTSOCK",
            errno::EPROTONOSUPPORT => "EPROTONOSUPPORT",
            errno::EOPNOTSUPP => "ENOTSUP",
            errno::EAFNOSUPPORT => "EAFNOSUPPORT",
            errno::EADDRINUSE => "EADDRINUSE",
            errno::ECONNRESET => "ECONNRESET",
            errno::ENOTCONN => "ENOTCONN",
            errno::ETIMEDOUT => "ETIMEDOUT",
            errno::ECONNREFUSED => "ECONNREFUSED",
            _ => "E?",
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Translate a native error code into its errno image
///
/// Pure and total. Codes without a POSIX counterpart answer `ENOSYS`.
pub const fn translate(code: NativeError) -> Errno {
    match code {
        NativeError::InvalidArgs => Errno::EINVAL,
        NativeError::OutOfMemory => Errno::ENOMEM,
        NativeError::NoSuchFile => Errno::ENOENT,
        NativeError::NotSupported => Errno::ENOTSUP,
        NativeError::NoSpace => Errno::ENOSPC,
        NativeError::Exists => Errno::EEXIST,
        NativeError::CrossDeviceLink => Errno::EXDEV,
        NativeError::DirNotEmpty => Errno::ENOTEMPTY,
        NativeError::IsDirectory => Errno::EISDIR,
        NativeError::NotADirectory => Errno::ENOTDIR,
        NativeError::Timeout => Errno::ETIMEDOUT,
        NativeError::NoPermission => Errno::EPERM,
        NativeError::BadDescriptor => Errno::EBADF,
        NativeError::WouldBlock => Errno::EWOULDBLOCK,
        NativeError::ConnectionFailed => Errno::ECONNREFUSED,
        NativeError::NotConnected => Errno::ENOTCONN,
        NativeError::SocketClosed => Errno::ECONNRESET,
        NativeError::NoFreeTile | NativeError::Unspecified => Errno::ENOSYS,
    }
}

impl From<NativeError> for Errno {
    #[inline]
    fn from(code: NativeError) -> Self {
        translate(code)
    }
}
