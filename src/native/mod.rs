/*!
 * Native Collaborators
 * Contracts of the microkernel runtime the shim translates onto
 *
 * The shim never talks to the runtime directly; everything goes through
 * these traits. Errors come back as `NativeError` values, never as panics,
 * and the gateways translate each one exactly once.
 */

pub mod memory;
mod types;

pub use types::{DirEntry, Endpoint, FileInfo, Interest, OpenMode, SeekOrigin};

use std::time::Duration;
use thiserror::Error;

use crate::core::types::Fd;

/// Error codes reported by native collaborators
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeError {
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("out of memory")]
    OutOfMemory,
    #[error("no such file or directory")]
    NoSuchFile,
    #[error("operation not supported")]
    NotSupported,
    #[error("no space left")]
    NoSpace,
    #[error("already exists")]
    Exists,
    #[error("cross-device link")]
    CrossDeviceLink,
    #[error("directory not empty")]
    DirNotEmpty,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("timeout")]
    Timeout,
    #[error("no permission")]
    NoPermission,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("operation would block")]
    WouldBlock,
    #[error("connection failed")]
    ConnectionFailed,
    #[error("socket not connected")]
    NotConnected,
    #[error("socket closed")]
    SocketClosed,
    #[error("no free tile")]
    NoFreeTile,
    #[error("unspecified error")]
    Unspecified,
}

impl NativeError {
    /// Every code, in declaration order
    pub const ALL: [NativeError; 19] = [
        NativeError::InvalidArgs,
        NativeError::OutOfMemory,
        NativeError::NoSuchFile,
        NativeError::NotSupported,
        NativeError::NoSpace,
        NativeError::Exists,
        NativeError::CrossDeviceLink,
        NativeError::DirNotEmpty,
        NativeError::IsDirectory,
        NativeError::NotADirectory,
        NativeError::Timeout,
        NativeError::NoPermission,
        NativeError::BadDescriptor,
        NativeError::WouldBlock,
        NativeError::ConnectionFailed,
        NativeError::NotConnected,
        NativeError::SocketClosed,
        NativeError::NoFreeTile,
        NativeError::Unspecified,
    ];

    /// Codes that intentionally have no POSIX image
    pub fn is_unmapped(self) -> bool {
        matches!(self, NativeError::NoFreeTile | NativeError::Unspecified)
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Native virtual file system together with the activity's file table
///
/// Descriptor numbers are allocated here; the shim only mirrors them.
/// `read`/`write` return `Some(n)` for progress (`Some(0)` is end of file or
/// zero progress) and `None` when the call would block.
pub trait FileSystem: Send {
    fn open(&mut self, path: &str, mode: OpenMode) -> NativeResult<Fd>;

    fn close(&mut self, fd: Fd) -> NativeResult<()>;

    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> NativeResult<Option<usize>>;

    fn write(&mut self, fd: Fd, buf: &[u8]) -> NativeResult<Option<usize>>;

    /// Reposition the file cursor; returns the new absolute offset
    fn seek(&mut self, fd: Fd, offset: i64, origin: SeekOrigin) -> NativeResult<u64>;

    fn truncate(&mut self, fd: Fd, length: u64) -> NativeResult<()>;

    fn sync(&mut self, fd: Fd) -> NativeResult<()>;

    fn stat(&mut self, path: &str) -> NativeResult<FileInfo>;

    fn fstat(&mut self, fd: Fd) -> NativeResult<FileInfo>;

    fn mkdir(&mut self, path: &str, mode: u32) -> NativeResult<()>;

    fn rmdir(&mut self, path: &str) -> NativeResult<()>;

    fn rename(&mut self, old: &str, new: &str) -> NativeResult<()>;

    fn link(&mut self, old: &str, new: &str) -> NativeResult<()>;

    fn unlink(&mut self, path: &str) -> NativeResult<()>;

    /// Start iterating the directory behind an open descriptor
    fn open_dir(&mut self, fd: Fd) -> NativeResult<Box<dyn DirStream>>;

    fn chdir(&mut self, path: &str) -> NativeResult<()>;

    fn fchdir(&mut self, fd: Fd) -> NativeResult<()>;

    fn getcwd(&mut self) -> NativeResult<String>;

    /// Whether `fd` refers to an open file
    fn is_open(&self, fd: Fd) -> bool;
}

/// Native directory stream, one entry per call
pub trait DirStream: Send {
    /// Next entry, or `None` once the directory is exhausted
    fn read_entry(&mut self) -> NativeResult<Option<DirEntry>>;
}

// =============================================================================
// NETWORK
// =============================================================================

/// Session with the native network service
pub trait NetworkManager: Send {
    fn create_stream(&mut self) -> NativeResult<Box<dyn StreamSocket>>;

    fn create_datagram(&mut self) -> NativeResult<Box<dyn DatagramSocket>>;
}

/// Opens the network session on first use
pub trait NetConnector: Send {
    fn connect(&mut self, service: &str) -> NativeResult<Box<dyn NetworkManager>>;
}

impl<F> NetConnector for F
where
    F: FnMut(&str) -> NativeResult<Box<dyn NetworkManager>> + Send,
{
    fn connect(&mut self, service: &str) -> NativeResult<Box<dyn NetworkManager>> {
        self(service)
    }
}

/// Native TCP socket
///
/// There is no separate bind step: `listen` binds and listens at once.
#[cfg_attr(test, mockall::automock)]
pub trait StreamSocket: Send {
    fn listen(&mut self, port: u16) -> NativeResult<()>;

    /// Block until a peer connects to the listening socket
    fn accept(&mut self) -> NativeResult<Endpoint>;

    fn connect(&mut self, remote: Endpoint) -> NativeResult<()>;

    fn send(&mut self, data: &[u8]) -> NativeResult<Option<usize>>;

    fn recv(&mut self, buf: &mut [u8]) -> NativeResult<Option<usize>>;

    fn local_endpoint(&self) -> NativeResult<Endpoint>;

    fn remote_endpoint(&self) -> NativeResult<Endpoint>;

    /// Tear the connection down without a graceful close
    fn abort(&mut self) -> NativeResult<()>;
}

/// Native UDP socket
#[cfg_attr(test, mockall::automock)]
pub trait DatagramSocket: Send {
    fn bind(&mut self, port: u16) -> NativeResult<()>;

    /// Fix the default peer for `send`/`recv`
    fn connect(&mut self, remote: Endpoint) -> NativeResult<()>;

    fn send(&mut self, data: &[u8]) -> NativeResult<Option<usize>>;

    fn send_to(&mut self, data: &[u8], dest: Endpoint) -> NativeResult<Option<usize>>;

    fn recv(&mut self, buf: &mut [u8]) -> NativeResult<Option<usize>>;

    fn recv_from(&mut self, buf: &mut [u8]) -> NativeResult<Option<(usize, Endpoint)>>;

    fn local_endpoint(&self) -> NativeResult<Endpoint>;

    fn remote_endpoint(&self) -> NativeResult<Endpoint>;
}

// =============================================================================
// EVENT WAIT
// =============================================================================

/// Creates wait-sets
pub trait EventWait: Send {
    fn create_wait_set(&mut self) -> NativeResult<Box<dyn WaitSet>>;
}

/// Readiness multiplexer over several descriptors
pub trait WaitSet: Send {
    fn add(&mut self, fd: Fd, interest: Interest);

    fn set(&mut self, fd: Fd, interest: Interest);

    fn remove(&mut self, fd: Fd);

    /// Block until at least one descriptor is ready
    fn wait(&mut self);

    /// Block until something is ready or `timeout` elapsed
    fn wait_for(&mut self, timeout: Duration);

    /// Visit every ready descriptor with the subset of its interest that is ready
    fn for_each_ready(&mut self, f: &mut dyn FnMut(Fd, Interest));
}

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// The activity's view of itself
pub trait Environment: Send {
    /// Identity of the running activity
    fn activity_id(&self) -> u32;

    /// Time elapsed since boot
    fn now(&self) -> Duration;

    fn sleep_for(&mut self, duration: Duration);

    /// Low-level debug output channel; `line` carries its own newline
    fn debug_write(&mut self, line: &str);
}

/// All collaborators one shim instance needs
pub struct Collaborators {
    pub fs: Box<dyn FileSystem>,
    pub events: Box<dyn EventWait>,
    pub env: Box<dyn Environment>,
    pub net: Option<Box<dyn NetConnector>>,
}

impl Collaborators {
    pub fn new(
        fs: Box<dyn FileSystem>,
        events: Box<dyn EventWait>,
        env: Box<dyn Environment>,
    ) -> Self {
        Self {
            fs,
            events,
            env,
            net: None,
        }
    }

    /// Attach a connector used to open the network session on first use
    pub fn with_network(mut self, connector: Box<dyn NetConnector>) -> Self {
        self.net = Some(connector);
        self
    }
}
