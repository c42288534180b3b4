/*!
 * File Gateway
 *
 * open/read/write and friends onto the native file system. Reads and
 * writes on socket descriptors are forwarded to the socket gateway so the
 * C library can use plain `read`/`write` on connected sockets.
 */

use linux_raw_sys::general::{
    AT_REMOVEDIR, F_SETLK, O_APPEND, O_CREAT, O_EXCL, O_RDWR, O_TRUNC, O_WRONLY,
};
use tracing::debug;

use super::descriptors::Descriptor;
use super::Dispatcher;
use crate::abi::errno::Errno;
use crate::abi::layout::{IoVec, F_OK, R_OK, W_OK, X_OK};
use crate::abi::user;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::types::Fd;
use crate::native::{NativeError, OpenMode, SeekOrigin};

/// Translate POSIX open flags into a native open mode
pub fn open_mode(flags: u32) -> OpenMode {
    let mut mode = if flags & O_WRONLY as u32 != 0 {
        OpenMode::WRITE
    } else if flags & O_RDWR as u32 != 0 {
        OpenMode::RW
    } else {
        OpenMode::READ
    };
    if flags & O_CREAT as u32 != 0 {
        mode |= OpenMode::CREATE;
    }
    if flags & O_TRUNC as u32 != 0 {
        mode |= OpenMode::TRUNC;
    }
    if flags & O_APPEND as u32 != 0 {
        mode |= OpenMode::APPEND;
    }
    mode
}

/// Fold the tri-state native transfer result into a gateway result
#[inline]
pub(super) fn progress(result: Option<usize>) -> SyscallResult<usize> {
    result.ok_or(SyscallError::WouldBlock)
}

impl Dispatcher {
    // =========================================================================
    // OPEN / CLOSE
    // =========================================================================

    /// Open `path`; the directory descriptor is ignored and relative paths
    /// resolve against the native working directory
    pub fn open_at(&mut self, _dirfd: Fd, path: &str, flags: u32, _mode: u32) -> SyscallResult<Fd> {
        let excl = O_CREAT as u32 | O_EXCL as u32;
        if flags & excl == excl && self.fs.stat(path).is_ok() {
            return Err(NativeError::Exists.into());
        }

        let mode = open_mode(flags);
        let fd = self.fs.open(path, mode)?;
        if fd < 0 || fd as usize >= self.layout.max_fds {
            let _ = self.fs.close(fd);
            return Err(SyscallError::descriptors_exhausted("file"));
        }
        debug!(path, ?mode, fd, "open");
        Ok(fd)
    }

    // =========================================================================
    // TRANSFER
    // =========================================================================

    /// One native read; `None` means no data without blocking
    pub(super) fn read_some(&mut self, fd: Fd, buf: &mut [u8]) -> SyscallResult<Option<usize>> {
        match self.descriptor(fd)? {
            Descriptor::File(fd) => Ok(self.fs.read(fd, buf)?),
            Descriptor::Directory(_) => Err(NativeError::IsDirectory.into()),
            Descriptor::Socket(slot) => self.socket_recv(slot, buf),
            Descriptor::Epoll(_) => Err(SyscallError::InvalidArgument("read on epoll descriptor")),
        }
    }

    /// One native write; `None` means no room without blocking
    pub(super) fn write_some(&mut self, fd: Fd, buf: &[u8]) -> SyscallResult<Option<usize>> {
        match self.descriptor(fd)? {
            Descriptor::File(fd) => Ok(self.fs.write(fd, buf)?),
            Descriptor::Directory(_) => Err(NativeError::IsDirectory.into()),
            Descriptor::Socket(slot) => self.socket_send(slot, buf),
            Descriptor::Epoll(_) => Err(SyscallError::InvalidArgument("write on epoll descriptor")),
        }
    }

    /// Single native read; short counts are returned as they are
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> SyscallResult<usize> {
        let result = self.read_some(fd, buf)?;
        progress(result)
    }

    /// Single native write; short counts are returned as they are
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> SyscallResult<usize> {
        let result = self.write_some(fd, buf)?;
        progress(result)
    }

    /// Scatter read; stops at the first short segment
    ///
    /// An error after some progress ends the call with the bytes read so far.
    ///
    /// # Safety
    /// Every segment must describe writable memory.
    pub unsafe fn readv(&mut self, fd: Fd, iov: &[IoVec]) -> SyscallResult<usize> {
        let mut total = 0usize;
        for seg in iov {
            let buf = user::slice_mut(seg.iov_base, seg.iov_len)?;
            let result = match self.read_some(fd, buf) {
                Ok(result) => result,
                Err(_) if total > 0 => break,
                Err(err) => return Err(err),
            };
            match result {
                Some(n) => {
                    total += n;
                    if n < seg.iov_len {
                        break;
                    }
                }
                None if total == 0 => return Err(SyscallError::WouldBlock),
                None => break,
            }
        }
        Ok(total)
    }

    /// Gather write; each segment is pushed until it is fully written
    ///
    /// Zero progress ends the call with the bytes written so far; would-block
    /// and native errors do the same unless nothing was written yet.
    ///
    /// # Safety
    /// Every segment must describe readable memory.
    pub unsafe fn writev(&mut self, fd: Fd, iov: &[IoVec]) -> SyscallResult<usize> {
        let mut total = 0usize;
        for seg in iov {
            let buf = user::slice(seg.iov_base, seg.iov_len)?;
            let mut off = 0;
            while off < buf.len() {
                let result = match self.write_some(fd, &buf[off..]) {
                    Ok(result) => result,
                    Err(_) if total > 0 => return Ok(total),
                    Err(err) => return Err(err),
                };
                match result {
                    Some(0) => return Ok(total),
                    Some(n) => {
                        off += n;
                        total += n;
                    }
                    None if total == 0 => return Err(SyscallError::WouldBlock),
                    None => return Ok(total),
                }
            }
        }
        Ok(total)
    }

    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: u32) -> SyscallResult<u64> {
        let origin =
            SeekOrigin::from_raw(whence).ok_or(SyscallError::InvalidArgument("lseek whence"))?;
        match self.descriptor(fd)? {
            Descriptor::File(fd) | Descriptor::Directory(fd) => {
                Ok(self.fs.seek(fd, offset, origin)?)
            }
            Descriptor::Socket(_) | Descriptor::Epoll(_) => Err(Errno::ESPIPE.into()),
        }
    }

    // =========================================================================
    // FILE CONTROL
    // =========================================================================

    /// Only `F_SETLK` is accepted, and locking always succeeds
    pub fn fcntl(&mut self, _fd: Fd, cmd: u32) -> SyscallResult<usize> {
        if cmd == F_SETLK as u32 {
            Ok(0)
        } else {
            Err(SyscallError::NotImplemented("fcntl command"))
        }
    }

    /// Access check against the mode bits of the file
    ///
    /// There are no users, so read, write and execute are each checked
    /// against the owner bits only. `F_OK` just checks that the path exists.
    pub fn faccessat(&mut self, path: &str, mode: u32) -> SyscallResult<()> {
        if mode & !(R_OK | W_OK | X_OK) != 0 {
            return Err(SyscallError::InvalidArgument("access mode"));
        }
        let info = self.fs.stat(path)?;
        if mode == F_OK {
            return Ok(());
        }
        let wanted = [(R_OK, 0o400), (W_OK, 0o200), (X_OK, 0o100)];
        let denied = wanted
            .iter()
            .any(|&(bit, perm)| mode & bit != 0 && info.mode & perm == 0);
        if denied {
            return Err(Errno::EACCES.into());
        }
        Ok(())
    }

    pub fn fsync(&mut self, fd: Fd) -> SyscallResult<()> {
        match self.descriptor(fd)? {
            Descriptor::File(fd) | Descriptor::Directory(fd) => Ok(self.fs.sync(fd)?),
            Descriptor::Socket(_) | Descriptor::Epoll(_) => {
                Err(SyscallError::InvalidArgument("fsync on non-file"))
            }
        }
    }

    pub fn ftruncate(&mut self, fd: Fd, length: i64) -> SyscallResult<()> {
        let length =
            u64::try_from(length).map_err(|_| SyscallError::InvalidArgument("negative length"))?;
        match self.descriptor(fd)? {
            Descriptor::File(fd) => Ok(self.fs.truncate(fd, length)?),
            Descriptor::Directory(_) => Err(NativeError::IsDirectory.into()),
            Descriptor::Socket(_) | Descriptor::Epoll(_) => {
                Err(SyscallError::InvalidArgument("ftruncate on non-file"))
            }
        }
    }

    /// Truncate by path: open for writing, truncate, close
    pub fn truncate(&mut self, path: &str, length: i64) -> SyscallResult<()> {
        let length =
            u64::try_from(length).map_err(|_| SyscallError::InvalidArgument("negative length"))?;
        let fd = self.fs.open(path, OpenMode::WRITE)?;
        let result = self.fs.truncate(fd, length);
        self.fs.close(fd)?;
        Ok(result?)
    }

    // =========================================================================
    // NAMESPACE
    // =========================================================================

    pub fn mkdir(&mut self, path: &str, mode: u32) -> SyscallResult<()> {
        Ok(self.fs.mkdir(path, mode & !self.umask & 0o7777)?)
    }

    pub fn rename(&mut self, old: &str, new: &str, flags: u32) -> SyscallResult<()> {
        if flags != 0 {
            return Err(SyscallError::InvalidArgument("renameat2 flags"));
        }
        Ok(self.fs.rename(old, new)?)
    }

    pub fn link(&mut self, old: &str, new: &str) -> SyscallResult<()> {
        Ok(self.fs.link(old, new)?)
    }

    /// `unlink`, or `rmdir` when `AT_REMOVEDIR` is set
    pub fn unlinkat(&mut self, path: &str, flags: u32) -> SyscallResult<()> {
        match flags {
            0 => Ok(self.fs.unlink(path)?),
            f if f == AT_REMOVEDIR as u32 => self.rmdir(path),
            _ => Err(SyscallError::InvalidArgument("unlinkat flags")),
        }
    }

    pub fn rmdir(&mut self, path: &str) -> SyscallResult<()> {
        Ok(self.fs.rmdir(path)?)
    }

    pub fn chdir(&mut self, path: &str) -> SyscallResult<()> {
        Ok(self.fs.chdir(path)?)
    }

    pub fn fchdir(&mut self, fd: Fd) -> SyscallResult<()> {
        match self.descriptor(fd)? {
            Descriptor::File(fd) | Descriptor::Directory(fd) => Ok(self.fs.fchdir(fd)?),
            Descriptor::Socket(_) | Descriptor::Epoll(_) => Err(NativeError::NotADirectory.into()),
        }
    }

    /// Copy the working directory into `buf`; returns its length including the NUL
    pub fn getcwd(&mut self, buf: &mut [u8]) -> SyscallResult<usize> {
        let cwd = self.fs.getcwd()?;
        let len = cwd.len() + 1;
        if buf.len() < len {
            return Err(Errno::ERANGE.into());
        }
        buf[..cwd.len()].copy_from_slice(cwd.as_bytes());
        buf[cwd.len()] = 0;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShimConfig;
    use crate::native::memory::MemoryRuntime;
    use linux_raw_sys::general::{AT_FDCWD, O_RDONLY, SEEK_CUR, SEEK_END, SEEK_SET};
    use pretty_assertions::assert_eq;

    fn dispatcher() -> (Dispatcher, MemoryRuntime) {
        let config = ShimConfig::embedded();
        let runtime = MemoryRuntime::new(1, config.max_fds);
        (Dispatcher::new(config, runtime.collaborators()), runtime)
    }

    fn iov(buf: &[u8]) -> IoVec {
        IoVec {
            iov_base: buf.as_ptr() as usize,
            iov_len: buf.len(),
        }
    }

    #[test]
    fn test_open_mode_translation() {
        assert_eq!(open_mode(O_RDONLY), OpenMode::READ);
        assert_eq!(open_mode(O_WRONLY), OpenMode::WRITE);
        assert_eq!(open_mode(O_RDWR), OpenMode::RW);
        assert_eq!(
            open_mode(O_WRONLY | O_CREAT | O_TRUNC),
            OpenMode::WRITE | OpenMode::CREATE | OpenMode::TRUNC
        );
        assert_eq!(
            open_mode(O_RDWR | O_APPEND),
            OpenMode::RW | OpenMode::APPEND
        );
    }

    #[test]
    fn test_open_missing_is_enoent() {
        let (mut d, _rt) = dispatcher();
        let err = d.open_at(AT_FDCWD, "/missing", O_RDONLY, 0).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOENT);
    }

    #[test]
    fn test_exclusive_create() {
        let (mut d, rt) = dispatcher();
        rt.fs.write_file("/f", b"").unwrap();
        let err = d
            .open_at(AT_FDCWD, "/f", O_WRONLY | O_CREAT | O_EXCL, 0o644)
            .unwrap_err();
        assert_eq!(err.errno(), Errno::EEXIST);
    }

    #[test]
    fn test_writev_then_readv() {
        let (mut d, rt) = dispatcher();
        let fd = d
            .open_at(AT_FDCWD, "/v", O_WRONLY | O_CREAT, 0o644)
            .unwrap();
        let (a, b) = (b"hello ".to_vec(), b"world".to_vec());
        let written = unsafe { d.writev(fd, &[iov(&a), iov(&b)]) }.unwrap();
        assert_eq!(written, 11);
        d.close(fd).unwrap();
        assert_eq!(rt.fs.read_file("/v").unwrap(), b"hello world");

        let fd = d.open_at(AT_FDCWD, "/v", O_RDONLY, 0).unwrap();
        let (x, y) = (vec![0u8; 4], vec![0u8; 16]);
        let read = unsafe { d.readv(fd, &[iov(&x), iov(&y)]) }.unwrap();
        assert_eq!(read, 11);
        assert_eq!(&x, b"hell");
        assert_eq!(&y[..7], b"o world");
    }

    #[test]
    fn test_lseek() {
        let (mut d, rt) = dispatcher();
        rt.fs.write_file("/s", b"0123456789").unwrap();
        let fd = d.open_at(AT_FDCWD, "/s", O_RDONLY, 0).unwrap();
        assert_eq!(d.lseek(fd, -3, SEEK_END).unwrap(), 7);
        let mut buf = [0u8; 8];
        assert_eq!(d.read(fd, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"789");
        assert_eq!(d.lseek(fd, 2, SEEK_SET).unwrap(), 2);
        assert_eq!(d.lseek(fd, 1, SEEK_CUR).unwrap(), 3);
        assert_eq!(d.lseek(fd, 0, 7).unwrap_err().errno(), Errno::EINVAL);
    }

    #[test]
    fn test_fcntl_only_setlk() {
        let (mut d, _rt) = dispatcher();
        assert_eq!(d.fcntl(0, F_SETLK), Ok(0));
        assert_eq!(d.fcntl(0, 1).unwrap_err().errno(), Errno::ENOSYS);
    }

    #[test]
    fn test_faccessat() {
        let (mut d, rt) = dispatcher();
        rt.fs.write_file("/a", b"").unwrap();
        assert_eq!(d.faccessat("/a", F_OK), Ok(()));
        assert_eq!(d.faccessat("/a", R_OK | W_OK), Ok(()));
        assert_eq!(d.faccessat("/a", X_OK).unwrap_err().errno(), Errno::EACCES);
        assert_eq!(d.faccessat("/b", F_OK).unwrap_err().errno(), Errno::ENOENT);
    }

    #[test]
    fn test_truncate_paths() {
        let (mut d, rt) = dispatcher();
        rt.fs.write_file("/t", b"abcdef").unwrap();
        d.truncate("/t", 2).unwrap();
        assert_eq!(rt.fs.read_file("/t").unwrap(), b"ab");

        let fd = d.open_at(AT_FDCWD, "/t", O_RDWR, 0).unwrap();
        d.ftruncate(fd, 4).unwrap();
        assert_eq!(rt.fs.read_file("/t").unwrap(), b"ab\0\0");
        assert_eq!(d.ftruncate(fd, -1).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(d.fsync(fd), Ok(()));
    }

    #[test]
    fn test_namespace_operations() {
        let (mut d, rt) = dispatcher();
        d.mkdir("/d", 0o777).unwrap();
        assert_eq!(d.mkdir("/d", 0o777).unwrap_err().errno(), Errno::EEXIST);
        rt.fs.write_file("/d/f", b"1").unwrap();

        assert_eq!(d.unlinkat("/d", AT_REMOVEDIR).unwrap_err().errno(), Errno::ENOTEMPTY);
        d.link("/d/f", "/d/g").unwrap();
        d.rename("/d/g", "/h", 0).unwrap();
        d.unlinkat("/d/f", 0).unwrap();
        d.unlinkat("/d", AT_REMOVEDIR).unwrap();
        assert!(!rt.fs.exists("/d"));
        assert_eq!(rt.fs.read_file("/h").unwrap(), b"1");
        assert_eq!(d.rename("/h", "/i", 1).unwrap_err().errno(), Errno::EINVAL);
    }

    #[test]
    fn test_mkdir_applies_umask() {
        let (mut d, rt) = dispatcher();
        d.mkdir("/m", 0o777).unwrap();
        let mut fs = rt.fs.clone();
        let info = crate::native::FileSystem::stat(&mut fs, "/m").unwrap();
        assert_eq!(info.mode & 0o777, 0o755);
    }

    #[test]
    fn test_getcwd() {
        let (mut d, _rt) = dispatcher();
        d.mkdir("/work", 0o755).unwrap();
        d.chdir("/work").unwrap();

        let mut buf = [0xffu8; 16];
        assert_eq!(d.getcwd(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"/work\0");

        let mut small = [0u8; 5];
        assert_eq!(d.getcwd(&mut small).unwrap_err().errno(), Errno::ERANGE);
    }

    #[test]
    fn test_fchdir() {
        let (mut d, _rt) = dispatcher();
        d.mkdir("/x", 0o755).unwrap();
        let fd = d.open_at(AT_FDCWD, "/x", O_RDONLY, 0).unwrap();
        d.fchdir(fd).unwrap();
        let mut buf = [0u8; 8];
        d.getcwd(&mut buf).unwrap();
        assert_eq!(&buf[..3], b"/x\0");
    }
}
