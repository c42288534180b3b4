/*!
 * Stat Translation
 * Native file info into `struct kstat` and `struct statx`
 */

use linux_raw_sys::general::AT_EMPTY_PATH;

use super::descriptors::Descriptor;
use super::Dispatcher;
use crate::abi::layout::{KernelStat, Statx, StatxTimestamp, STATX_BASIC_STATS};
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::limits::STAT_BLOCK_SIZE;
use crate::core::types::Fd;
use crate::native::FileInfo;

#[inline]
fn blocks(size: u64) -> u64 {
    size.div_ceil(STAT_BLOCK_SIZE)
}

/// Fill a `kstat`; owner is root, ctime mirrors mtime
pub fn kernel_stat(info: &FileInfo) -> KernelStat {
    KernelStat {
        st_dev: info.devno as u64,
        st_ino: info.inode,
        st_nlink: info.links as _,
        st_mode: info.mode,
        st_uid: 0,
        st_gid: 0,
        st_rdev: info.devno as u64,
        st_size: info.size as i64,
        st_blksize: STAT_BLOCK_SIZE as _,
        st_blocks: blocks(info.size) as i64,
        st_atime_sec: info.last_access as i64,
        st_atime_nsec: 0,
        st_mtime_sec: info.last_modified as i64,
        st_mtime_nsec: 0,
        st_ctime_sec: info.last_modified as i64,
        st_ctime_nsec: 0,
        ..KernelStat::default()
    }
}

fn timestamp(secs: u64) -> StatxTimestamp {
    StatxTimestamp {
        tv_sec: secs as i64,
        ..StatxTimestamp::default()
    }
}

/// Fill a `statx` with the basic fields
pub fn statx(info: &FileInfo) -> Statx {
    Statx {
        stx_mask: STATX_BASIC_STATS,
        stx_blksize: STAT_BLOCK_SIZE as u32,
        stx_nlink: info.links,
        stx_uid: 0,
        stx_gid: 0,
        stx_mode: info.mode as u16,
        stx_ino: info.inode,
        stx_size: info.size,
        stx_blocks: blocks(info.size),
        stx_atime: timestamp(info.last_access),
        stx_ctime: timestamp(info.last_modified),
        stx_mtime: timestamp(info.last_modified),
        stx_rdev_major: info.devno,
        stx_dev_major: info.devno,
        ..Statx::default()
    }
}

impl Dispatcher {
    fn file_info(&mut self, fd: Fd) -> SyscallResult<FileInfo> {
        match self.descriptor(fd)? {
            Descriptor::File(fd) | Descriptor::Directory(fd) => Ok(self.fs.fstat(fd)?),
            Descriptor::Socket(_) | Descriptor::Epoll(_) => {
                Err(SyscallError::Unsupported("stat on socket or epoll descriptor"))
            }
        }
    }

    /// Info for `path`, or for `dirfd` itself when `AT_EMPTY_PATH` asks for it
    fn path_info(&mut self, dirfd: Fd, path: &str, flags: u32) -> SyscallResult<FileInfo> {
        if path.is_empty() {
            if flags & AT_EMPTY_PATH as u32 != 0 {
                return self.file_info(dirfd);
            }
            return Err(crate::native::NativeError::NoSuchFile.into());
        }
        Ok(self.fs.stat(path)?)
    }

    pub fn fstat(&mut self, fd: Fd) -> SyscallResult<KernelStat> {
        self.file_info(fd).map(|info| kernel_stat(&info))
    }

    pub fn stat(&mut self, path: &str) -> SyscallResult<KernelStat> {
        Ok(kernel_stat(&self.fs.stat(path)?))
    }

    pub fn fstatat(&mut self, dirfd: Fd, path: &str, flags: u32) -> SyscallResult<KernelStat> {
        self.path_info(dirfd, path, flags).map(|info| kernel_stat(&info))
    }

    pub fn statx(&mut self, dirfd: Fd, path: &str, flags: u32) -> SyscallResult<Statx> {
        self.path_info(dirfd, path, flags).map(|info| statx(&info))
    }
}
