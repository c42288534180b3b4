/*!
 * Descriptor Table
 * Maps a POSIX descriptor number onto the object behind it
 */

use tracing::debug;

use super::Dispatcher;
use crate::config::FdRange;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::types::Fd;

/// What a live descriptor number refers to
///
/// Numbers are partitioned: native files below `max_fds`, then the socket
/// table, then epoll instances. A file descriptor becomes a `Directory`
/// once a directory stream has been opened on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    File(Fd),
    Directory(Fd),
    Socket(usize),
    Epoll(usize),
}

impl Dispatcher {
    /// Resolve `fd` against the live tables
    pub fn descriptor(&self, fd: Fd) -> SyscallResult<Descriptor> {
        match self.layout.classify(fd) {
            Some(FdRange::File(fd)) if self.dirs.contains(fd as usize) => {
                Ok(Descriptor::Directory(fd))
            }
            Some(FdRange::File(fd)) if self.fs.is_open(fd) => Ok(Descriptor::File(fd)),
            Some(FdRange::Socket(slot)) if self.sockets.contains(slot) => {
                Ok(Descriptor::Socket(slot))
            }
            Some(FdRange::Epoll(slot)) if self.epolls.contains(slot) => Ok(Descriptor::Epoll(slot)),
            _ => Err(SyscallError::BadDescriptor(fd)),
        }
    }

    /// Close `fd` and everything hanging off it
    ///
    /// The directory stream or socket state goes first so the number is
    /// clean before the native handle is released and can be handed out
    /// again. Epoll watches on the number are dropped as well.
    pub fn close(&mut self, fd: Fd) -> SyscallResult<()> {
        let descriptor = self.descriptor(fd)?;
        debug!(fd, ?descriptor, "close");

        match descriptor {
            Descriptor::Directory(fd) => {
                self.dirs.remove(fd as usize);
                self.forget_watches(fd);
                self.fs.close(fd)?;
            }
            Descriptor::File(fd) => {
                self.forget_watches(fd);
                self.fs.close(fd)?;
            }
            Descriptor::Socket(slot) => {
                self.forget_watches(fd);
                self.close_socket(slot);
            }
            Descriptor::Epoll(slot) => self.close_epoll(slot),
        }
        Ok(())
    }
}
