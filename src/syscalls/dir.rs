/*!
 * Directory Iteration
 * `getdents64` on top of native directory streams
 */

use tracing::debug;

use super::descriptors::Descriptor;
use super::Dispatcher;
use crate::abi::errno::Errno;
use crate::abi::layout::{dirent64_reclen, Dirent64Header, DT_UNKNOWN};
use crate::abi::user::bytes_of;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::types::Fd;
use crate::native::{DirEntry, DirStream, NativeError};

/// Directory stream state attached to an open file descriptor
///
/// An entry that did not fit the caller's buffer is parked in `pending`
/// and handed out first on the next call. `eof` is sticky until close.
pub struct OpenDir {
    stream: Box<dyn DirStream>,
    pending: Option<DirEntry>,
    eof: bool,
    position: i64,
}

impl OpenDir {
    pub fn new(stream: Box<dyn DirStream>) -> Self {
        Self {
            stream,
            pending: None,
            eof: false,
            position: 0,
        }
    }

    fn next_entry(&mut self) -> SyscallResult<Option<DirEntry>> {
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }
        if self.eof {
            return Ok(None);
        }
        let entry = self.stream.read_entry()?;
        if entry.is_none() {
            self.eof = true;
        }
        Ok(entry)
    }

    /// Convert as many entries as fit into `buf`
    pub fn fill(&mut self, buf: &mut [u8]) -> SyscallResult<usize> {
        let mut written = 0;
        loop {
            let entry = match self.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) if written == 0 => return Err(err),
                Err(_) => break,
            };

            let reclen = dirent64_reclen(entry.name.len());
            if reclen > buf.len() - written {
                self.pending = Some(entry);
                if written == 0 {
                    return Err(SyscallError::InvalidArgument("buffer too small for entry"));
                }
                break;
            }

            self.position += 1;
            encode(&mut buf[written..written + reclen], &entry, self.position);
            written += reclen;
        }
        Ok(written)
    }
}

/// Write one `linux_dirent64` record; `rec` is exactly the record length
fn encode(rec: &mut [u8], entry: &DirEntry, position: i64) {
    let header = Dirent64Header {
        d_ino: entry.inode,
        d_off: position,
        d_reclen: rec.len() as u16,
        d_type: DT_UNKNOWN,
    };
    let head = bytes_of(&header);
    let name = entry.name.as_bytes();
    rec[..head.len()].copy_from_slice(head);
    rec[head.len()..head.len() + name.len()].copy_from_slice(name);
    rec[head.len() + name.len()..].fill(0);
}

impl Dispatcher {
    /// Read directory entries of `fd` into `buf`
    ///
    /// The native stream is opened on first use. Returns 0 once the
    /// directory is exhausted, and keeps doing so until `fd` is closed.
    pub fn getdents64(&mut self, fd: Fd, buf: &mut [u8]) -> SyscallResult<usize> {
        let fd = match self.descriptor(fd)? {
            Descriptor::File(fd) | Descriptor::Directory(fd) => fd,
            Descriptor::Socket(_) | Descriptor::Epoll(_) => {
                return Err(NativeError::NotADirectory.into())
            }
        };
        let idx = fd as usize;
        if idx >= self.dirs.capacity() {
            return Err(Errno::ENOSPC.into());
        }

        if !self.dirs.contains(idx) {
            let stream = self.fs.open_dir(fd)?;
            self.dirs
                .insert_at(idx, OpenDir::new(stream))
                .map_err(|_| SyscallError::slots_exhausted("directory"))?;
            debug!(fd, "directory stream opened");
        }

        let dir = self
            .dirs
            .get_mut(idx)
            .ok_or(SyscallError::BadDescriptor(fd))?;
        dir.fill(buf)
    }
}
