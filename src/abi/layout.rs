/*!
 * Linux Structure Layouts
 * `#[repr(C)]` mirrors of the structures the C library hands in or expects back
 */

use static_assertions::const_assert_eq;
use std::mem::size_of;

// Constants the kernel headers do not carry in uapi form
pub const SOCK_NONBLOCK: u32 = 0o4000;
pub const SOCK_CLOEXEC: u32 = 0o2000000;
pub const SOCK_TYPE_MASK: u32 = 0xf;
pub const SHUT_RDWR: u32 = 2;
pub const F_OK: u32 = 0;
pub const X_OK: u32 = 1;
pub const W_OK: u32 = 2;
pub const R_OK: u32 = 4;
pub const TIOCGWINSZ: usize = 0x5413;
pub const STATX_BASIC_STATS: u32 = 0x7ff;
pub const DT_UNKNOWN: u8 = 0;

/// `struct kstat` as the x86-64 kernel fills it
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_nlink: u64,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub __pad0: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atime_sec: i64,
    pub st_atime_nsec: i64,
    pub st_mtime_sec: i64,
    pub st_mtime_nsec: i64,
    pub st_ctime_sec: i64,
    pub st_ctime_nsec: i64,
    pub __unused: [i64; 3],
}

#[cfg(target_arch = "x86_64")]
const_assert_eq!(size_of::<KernelStat>(), 144);

/// `struct kstat` in the asm-generic layout (riscv64, aarch64)
#[cfg(not(target_arch = "x86_64"))]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub __pad1: u64,
    pub st_size: i64,
    pub st_blksize: i32,
    pub __pad2: i32,
    pub st_blocks: i64,
    pub st_atime_sec: i64,
    pub st_atime_nsec: i64,
    pub st_mtime_sec: i64,
    pub st_mtime_nsec: i64,
    pub st_ctime_sec: i64,
    pub st_ctime_nsec: i64,
    pub __unused: [u32; 2],
}

#[cfg(not(target_arch = "x86_64"))]
const_assert_eq!(size_of::<KernelStat>(), 128);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatxTimestamp {
    pub tv_sec: i64,
    pub tv_nsec: u32,
    pub __reserved: i32,
}

/// `struct statx`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statx {
    pub stx_mask: u32,
    pub stx_blksize: u32,
    pub stx_attributes: u64,
    pub stx_nlink: u32,
    pub stx_uid: u32,
    pub stx_gid: u32,
    pub stx_mode: u16,
    pub __spare0: u16,
    pub stx_ino: u64,
    pub stx_size: u64,
    pub stx_blocks: u64,
    pub stx_attributes_mask: u64,
    pub stx_atime: StatxTimestamp,
    pub stx_btime: StatxTimestamp,
    pub stx_ctime: StatxTimestamp,
    pub stx_mtime: StatxTimestamp,
    pub stx_rdev_major: u32,
    pub stx_rdev_minor: u32,
    pub stx_dev_major: u32,
    pub stx_dev_minor: u32,
    pub __spare2: [u64; 14],
}

const_assert_eq!(size_of::<Statx>(), 256);

/// `struct sockaddr_in`; port and address are in network byte order
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SockAddrIn {
    pub sin_family: u16,
    pub sin_port: u16,
    pub sin_addr: u32,
    pub sin_zero: [u8; 8],
}

const_assert_eq!(size_of::<SockAddrIn>(), 16);

/// `struct iovec`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoVec {
    pub iov_base: usize,
    pub iov_len: usize,
}

/// `struct msghdr` (kernel layout)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgHdr {
    pub msg_name: usize,
    pub msg_namelen: u32,
    pub msg_iov: usize,
    pub msg_iovlen: usize,
    pub msg_control: usize,
    pub msg_controllen: usize,
    pub msg_flags: i32,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(size_of::<MsgHdr>(), 56);

/// `struct epoll_event`; packed on x86-64 only
#[cfg_attr(target_arch = "x86_64", repr(C, packed))]
#[cfg_attr(not(target_arch = "x86_64"), repr(C))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpollEvent {
    pub events: u32,
    pub data: u64,
}

#[cfg(target_arch = "x86_64")]
const_assert_eq!(size_of::<EpollEvent>(), 12);

/// Fixed part of `struct linux_dirent64`; the NUL-terminated name follows
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Dirent64Header {
    pub d_ino: u64,
    pub d_off: i64,
    pub d_reclen: u16,
    pub d_type: u8,
}

const_assert_eq!(size_of::<Dirent64Header>(), 19);

/// Record length of a directory entry with a name of `name_len` bytes
#[inline]
pub const fn dirent64_reclen(name_len: usize) -> usize {
    let raw = size_of::<Dirent64Header>() + name_len + 1;
    (raw + 7) & !7
}

pub const UTS_FIELD_LEN: usize = 65;

/// `struct utsname`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utsname {
    pub sysname: [u8; UTS_FIELD_LEN],
    pub nodename: [u8; UTS_FIELD_LEN],
    pub release: [u8; UTS_FIELD_LEN],
    pub version: [u8; UTS_FIELD_LEN],
    pub machine: [u8; UTS_FIELD_LEN],
    pub domainname: [u8; UTS_FIELD_LEN],
}

const_assert_eq!(size_of::<Utsname>(), 390);

impl Default for Utsname {
    fn default() -> Self {
        Self {
            sysname: [0; UTS_FIELD_LEN],
            nodename: [0; UTS_FIELD_LEN],
            release: [0; UTS_FIELD_LEN],
            version: [0; UTS_FIELD_LEN],
            machine: [0; UTS_FIELD_LEN],
            domainname: [0; UTS_FIELD_LEN],
        }
    }
}

/// Copy `value` into a NUL-terminated utsname field, truncating if needed
pub fn fill_uts_field(field: &mut [u8; UTS_FIELD_LEN], value: &str) {
    let len = value.len().min(UTS_FIELD_LEN - 1);
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
    field[len..].fill(0);
}

/// `struct winsize`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Winsize {
    pub ws_row: u16,
    pub ws_col: u16,
    pub ws_xpixel: u16,
    pub ws_ypixel: u16,
}

/// `struct timespec` (64-bit)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}
