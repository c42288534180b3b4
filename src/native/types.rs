/*!
 * Native Types
 * Plain data exchanged with the native collaborators
 */

use bitflags::bitflags;
use linux_raw_sys::general::{SEEK_CUR, SEEK_END, SEEK_SET};
use static_assertions::const_assert_eq;
use std::fmt;
use std::net::Ipv4Addr;

bitflags! {
    /// Native file open mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const TRUNC = 1 << 3;
        const APPEND = 1 << 4;
        const CREATE = 1 << 5;
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Readiness a wait-set watches for or reports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u32 {
        const INPUT = 1 << 0;
        const OUTPUT = 1 << 1;
    }
}

/// Origin of a seek; discriminants equal the POSIX `SEEK_*` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SeekOrigin {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl SeekOrigin {
    pub fn from_raw(whence: u32) -> Option<Self> {
        match whence {
            0 => Some(SeekOrigin::Set),
            1 => Some(SeekOrigin::Cur),
            2 => Some(SeekOrigin::End),
            _ => None,
        }
    }
}

const_assert_eq!(SeekOrigin::Set as u32, SEEK_SET as u32);
const_assert_eq!(SeekOrigin::Cur as u32, SEEK_CUR as u32);
const_assert_eq!(SeekOrigin::End as u32, SEEK_END as u32);

/// File metadata as the native filesystem reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub devno: u32,
    pub inode: u64,
    /// POSIX type and permission bits
    pub mode: u32,
    pub links: u32,
    pub size: u64,
    /// Seconds
    pub last_access: u64,
    /// Seconds
    pub last_modified: u64,
}

impl FileInfo {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;

    pub fn is_dir(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFDIR
    }
}

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u64,
    pub name: String,
}

impl DirEntry {
    pub fn new(inode: u64, name: impl Into<String>) -> Self {
        Self {
            inode,
            name: name.into(),
        }
    }
}

/// Network endpoint: IPv4 address in host order plus port
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    pub addr: u32,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: u32, port: u16) -> Self {
        Self { addr, port }
    }

    /// The "no endpoint" sentinel
    pub const fn unspecified() -> Self {
        Self { addr: 0, port: 0 }
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::unspecified()
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }
}

impl From<(Ipv4Addr, u16)> for Endpoint {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self::new(u32::from(ip), port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
