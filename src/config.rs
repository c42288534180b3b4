/*!
 * Shim Configuration
 *
 * Table sizes, identity strings and diagnostics switches. Defaults match
 * an embedded activity; `from_env` and `from_json` overlay them.
 */

use serde::{Deserialize, Serialize};

use crate::core::limits::*;
use crate::core::types::Fd;

/// Identity reported by `uname`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnameInfo {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
    pub domainname: String,
}

impl Default for UnameInfo {
    fn default() -> Self {
        Self {
            sysname: "M3".into(),
            nodename: "kachel".into(),
            release: "latest".into(),
            version: "0.1".into(),
            machine: default_machine().into(),
            domainname: "localhost".into(),
        }
    }
}

fn default_machine() -> &'static str {
    if cfg!(target_arch = "riscv64") {
        "RISC-V"
    } else if cfg!(target_arch = "x86_64") {
        "x86-64"
    } else if cfg!(target_arch = "arm") {
        "ARMv7"
    } else if cfg!(target_arch = "aarch64") {
        "AArch64"
    } else {
        "unknown"
    }
}

/// Shim configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Size of the native file table
    pub max_fds: usize,
    pub max_sockets: usize,
    pub max_dirs: usize,
    pub max_epoll_instances: usize,
    pub max_epoll_watches: usize,
    /// Name of the network service session
    pub net_service: String,
    /// Print unknown syscalls to the debug channel
    pub log_unknown_syscalls: bool,
    /// Start with syscall tracing enabled for this many entries
    pub trace_capacity: Option<usize>,
    pub uname: UnameInfo,
    pub term_cols: u16,
    pub term_rows: u16,
    pub umask: u32,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self::embedded()
    }
}

impl ShimConfig {
    /// Default configuration for an embedded activity
    pub fn embedded() -> Self {
        Self {
            max_fds: DEFAULT_MAX_FDS,
            max_sockets: DEFAULT_MAX_SOCKETS,
            max_dirs: DEFAULT_MAX_DIRS,
            max_epoll_instances: DEFAULT_MAX_EPOLL_INSTANCES,
            max_epoll_watches: DEFAULT_MAX_EPOLL_WATCHES,
            net_service: "net".into(),
            log_unknown_syscalls: true,
            trace_capacity: None,
            uname: UnameInfo::default(),
            term_cols: DEFAULT_TERM_COLS,
            term_rows: DEFAULT_TERM_ROWS,
            umask: DEFAULT_UMASK,
        }
    }

    /// Small tables and quiet diagnostics
    pub fn minimal() -> Self {
        Self {
            max_fds: 16,
            max_sockets: 4,
            max_dirs: 4,
            max_epoll_instances: 1,
            max_epoll_watches: 4,
            log_unknown_syscalls: false,
            ..Self::embedded()
        }
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Defaults overlaid with `POSIX_SHIM_*` environment variables
    ///
    /// Recognised: `POSIX_SHIM_MAX_FDS`, `POSIX_SHIM_MAX_SOCKETS`,
    /// `POSIX_SHIM_MAX_DIRS`, `POSIX_SHIM_NET_SERVICE`,
    /// `POSIX_SHIM_LOG_UNKNOWN` (`0`/`1`), `POSIX_SHIM_TRACE` (capacity).
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::embedded();
        let var = |name: &str| std::env::var(name).ok();

        if let Some(v) = var("POSIX_SHIM_MAX_FDS").and_then(|v| v.parse().ok()) {
            config.max_fds = v;
        }
        if let Some(v) = var("POSIX_SHIM_MAX_SOCKETS").and_then(|v| v.parse().ok()) {
            config.max_sockets = v;
        }
        if let Some(v) = var("POSIX_SHIM_MAX_DIRS").and_then(|v| v.parse().ok()) {
            config.max_dirs = v;
        }
        if let Some(v) = var("POSIX_SHIM_NET_SERVICE") {
            config.net_service = v;
        }
        if let Some(v) = var("POSIX_SHIM_LOG_UNKNOWN") {
            config.log_unknown_syscalls = v == "1" || v == "true";
        }
        if let Some(v) = var("POSIX_SHIM_TRACE").and_then(|v| v.parse().ok()) {
            config.trace_capacity = Some(v);
        }
        config
    }

    /// Descriptor ranges derived from the table sizes
    pub fn layout(&self) -> FdLayout {
        FdLayout {
            max_fds: self.max_fds,
            max_sockets: self.max_sockets,
            max_epoll: self.max_epoll_instances,
        }
    }
}

/// Partition of the descriptor number space
///
/// Files `[0, max_fds)`, then sockets, then epoll instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdLayout {
    pub max_fds: usize,
    pub max_sockets: usize,
    pub max_epoll: usize,
}

/// Numeric range a descriptor falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdRange {
    File(Fd),
    Socket(usize),
    Epoll(usize),
}

impl FdLayout {
    #[inline]
    pub fn first_socket(&self) -> usize {
        self.max_fds
    }

    #[inline]
    pub fn first_epoll(&self) -> usize {
        self.max_fds + self.max_sockets
    }

    pub fn socket_fd(&self, slot: usize) -> Fd {
        (self.first_socket() + slot) as Fd
    }

    pub fn epoll_fd(&self, slot: usize) -> Fd {
        (self.first_epoll() + slot) as Fd
    }

    /// Which range `fd` lies in, or `None` if it is outside every range
    pub fn classify(&self, fd: Fd) -> Option<FdRange> {
        let n = usize::try_from(fd).ok()?;
        if n < self.max_fds {
            Some(FdRange::File(fd))
        } else if n < self.first_epoll() {
            Some(FdRange::Socket(n - self.first_socket()))
        } else if n < self.first_epoll() + self.max_epoll {
            Some(FdRange::Epoll(n - self.first_epoll()))
        } else {
            None
        }
    }
}
