/*!
 * Syscall Dispatcher
 *
 * Decodes a raw syscall number and its six argument words, reinterprets
 * the words (pointers, lengths, flags) for the call at hand and hands the
 * typed request to exactly one gateway operation. The gateway's result is
 * folded into the POSIX return convention: non-negative on success,
 * `-errno` on failure.
 */

use linux_raw_sys::general::AT_FDCWD;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::dir::OpenDir;
use super::epoll::EpollInstance;
use super::heap::HeapArea;
use super::socket::{NetSession, OpenSocket};
use super::trace::{TraceEntry, Tracer};
use crate::abi::layout::{IoVec, KernelStat, Statx, Timespec, Utsname, Winsize};
use crate::abi::{user, Sysno};
use crate::config::{FdLayout, ShimConfig};
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::slots::Slots;
use crate::core::types::{Fd, SyscallArgs};
use crate::native::{Collaborators, Environment, EventWait, FileSystem};

/// Upper bound on the number of segments in one `readv`/`writev`
const IOV_MAX: usize = 1024;

/// Translation context of one activity
///
/// Owns every table the gateways need: open directory streams, the socket
/// table, epoll instances, the trace log and the heap area. Nothing here
/// is global; the C entry points wrap one instance in a lock.
pub struct Dispatcher {
    pub(super) config: ShimConfig,
    pub(super) layout: FdLayout,
    pub(super) fs: Box<dyn FileSystem>,
    pub(super) events: Box<dyn EventWait>,
    pub(super) env: Box<dyn Environment>,
    pub(super) net: NetSession,
    pub(super) dirs: Slots<OpenDir>,
    pub(super) sockets: Slots<OpenSocket>,
    pub(super) epolls: Slots<EpollInstance>,
    pub(super) heap: HeapArea,
    pub(super) umask: u32,
    tracer: Tracer,
}

impl Dispatcher {
    pub fn new(config: ShimConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            fs,
            events,
            env,
            net,
        } = collaborators;

        let mut dispatcher = Self {
            layout: config.layout(),
            fs,
            events,
            env,
            net: NetSession::new(net),
            dirs: Slots::with_capacity(config.max_dirs),
            sockets: Slots::with_capacity(config.max_sockets),
            epolls: Slots::with_capacity(config.max_epoll_instances),
            heap: HeapArea::default(),
            umask: config.umask,
            tracer: Tracer::new(),
            config,
        };
        if let Some(max) = dispatcher.config.trace_capacity {
            dispatcher.enable_tracing(max);
        }

        debug!(
            max_fds = dispatcher.layout.max_fds,
            max_sockets = dispatcher.layout.max_sockets,
            max_epoll = dispatcher.layout.max_epoll,
            "syscall dispatcher initialized"
        );
        dispatcher
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    pub fn layout(&self) -> FdLayout {
        self.layout
    }

    // =========================================================================
    // TRACING
    // =========================================================================

    /// Record up to `max` subsequent calls
    pub fn enable_tracing(&mut self, max: usize) {
        debug!(max, "syscall tracing enabled");
        self.tracer.enable(max);
    }

    /// Stop tracing and write the log to the debug channel in call order
    pub fn disable_tracing(&mut self) -> Vec<TraceEntry> {
        let entries = self.tracer.drain();
        for (idx, entry) in entries.iter().enumerate() {
            self.env.debug_write(&entry.render(idx));
        }
        debug!(entries = entries.len(), "syscall tracing disabled");
        entries
    }

    /// Time spent inside dispatched calls since tracing was enabled
    pub fn syscall_time(&self) -> Duration {
        self.tracer.total()
    }

    pub fn trace_entries(&self) -> &[TraceEntry] {
        self.tracer.entries()
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Execute syscall `nr` with arguments `args`
    ///
    /// # Safety
    /// Pointer arguments are dereferenced in the calling address space, so
    /// every non-null pointer must be valid for the access the syscall
    /// makes, exactly as the kernel ABI requires.
    pub unsafe fn dispatch(&mut self, nr: usize, args: SyscallArgs) -> isize {
        let start = self.tracer.is_enabled().then(|| self.env.now());

        let result = match Sysno::from_raw(nr) {
            Some(sysno) => self.route(sysno, &args),
            None => Err(self.unknown(nr, &args)),
        };

        if let Some(start) = start {
            let end = self.env.now();
            self.tracer.record(nr, start, end);
        }

        match result {
            Ok(value) => {
                trace!(nr, value, "syscall");
                value as isize
            }
            Err(err) => {
                let errno = err.errno();
                trace!(nr, %errno, error = %err, "syscall failed");
                errno.as_ret()
            }
        }
    }

    fn unknown(&mut self, nr: usize, a: &SyscallArgs) -> SyscallError {
        warn!(nr, args = ?a, "unknown syscall");
        if self.config.log_unknown_syscalls {
            let line = format!(
                "unknown syscall({}, {}, {}, {}, {}, {}, {})\n",
                nr, a[0] as isize, a[1] as isize, a[2] as isize, a[3] as isize, a[4] as isize,
                a[5] as isize
            );
            self.env.debug_write(&line);
        }
        SyscallError::NotImplemented("unknown syscall")
    }

    unsafe fn route(&mut self, sysno: Sysno, a: &SyscallArgs) -> SyscallResult<usize> {
        let fd = |word: usize| word as i32 as Fd;

        match sysno {
            // -----------------------------------------------------------------
            // files
            // -----------------------------------------------------------------
            #[cfg(target_arch = "x86_64")]
            Sysno::Open => {
                let path = user::path(a[0])?;
                self.open_at(AT_FDCWD, path, a[1] as u32, a[2] as u32)
                    .map(fd_ret)
            }
            Sysno::Openat => {
                let path = user::path(a[1])?;
                self.open_at(fd(a[0]), path, a[2] as u32, a[3] as u32)
                    .map(fd_ret)
            }
            Sysno::Read => self.read(fd(a[0]), user::slice_mut(a[1], a[2])?),
            Sysno::Write => self.write(fd(a[0]), user::slice(a[1], a[2])?),
            Sysno::Readv => self.readv(fd(a[0]), iovecs(a[1], a[2])?),
            Sysno::Writev => self.writev(fd(a[0]), iovecs(a[1], a[2])?),
            Sysno::Lseek => self
                .lseek(fd(a[0]), a[1] as i64, a[2] as u32)
                .map(|off| off as usize),
            Sysno::Close => self.close(fd(a[0])).map(|_| 0),
            Sysno::Fcntl => self.fcntl(fd(a[0]), a[1] as u32),
            #[cfg(target_arch = "x86_64")]
            Sysno::Access => self.faccessat(user::path(a[0])?, a[1] as u32).map(|_| 0),
            Sysno::Faccessat | Sysno::Faccessat2 => {
                self.faccessat(user::path(a[1])?, a[2] as u32).map(|_| 0)
            }
            Sysno::Fsync | Sysno::Fdatasync => self.fsync(fd(a[0])).map(|_| 0),
            Sysno::Truncate => self
                .truncate(user::path(a[0])?, a[1] as i64)
                .map(|_| 0),
            Sysno::Ftruncate => self.ftruncate(fd(a[0]), a[1] as i64).map(|_| 0),

            // -----------------------------------------------------------------
            // stat family
            // -----------------------------------------------------------------
            Sysno::Fstat => {
                let stat = self.fstat(fd(a[0]))?;
                user::write::<KernelStat>(a[1], stat).map(|_| 0)
            }
            #[cfg(target_arch = "x86_64")]
            Sysno::Stat | Sysno::Lstat => {
                let stat = self.stat(user::path(a[0])?)?;
                user::write::<KernelStat>(a[1], stat).map(|_| 0)
            }
            Sysno::Newfstatat => {
                let path = user::path_or_empty(a[1])?;
                let stat = self.fstatat(fd(a[0]), path, a[3] as u32)?;
                user::write::<KernelStat>(a[2], stat).map(|_| 0)
            }
            Sysno::Statx => {
                let path = user::path_or_empty(a[1])?;
                let stx = self.statx(fd(a[0]), path, a[2] as u32)?;
                user::write::<Statx>(a[4], stx).map(|_| 0)
            }
            Sysno::Getdents64 => self.getdents64(fd(a[0]), user::slice_mut(a[1], a[2])?),

            // -----------------------------------------------------------------
            // namespace
            // -----------------------------------------------------------------
            #[cfg(target_arch = "x86_64")]
            Sysno::Mkdir => self.mkdir(user::path(a[0])?, a[1] as u32).map(|_| 0),
            Sysno::Mkdirat => self.mkdir(user::path(a[1])?, a[2] as u32).map(|_| 0),
            #[cfg(target_arch = "x86_64")]
            Sysno::Rename => self
                .rename(user::path(a[0])?, user::path(a[1])?, 0)
                .map(|_| 0),
            #[cfg(not(target_arch = "riscv64"))]
            Sysno::Renameat => self
                .rename(user::path(a[1])?, user::path(a[3])?, 0)
                .map(|_| 0),
            Sysno::Renameat2 => self
                .rename(user::path(a[1])?, user::path(a[3])?, a[4] as u32)
                .map(|_| 0),
            #[cfg(target_arch = "x86_64")]
            Sysno::Link => self.link(user::path(a[0])?, user::path(a[1])?).map(|_| 0),
            Sysno::Linkat => self.link(user::path(a[1])?, user::path(a[3])?).map(|_| 0),
            #[cfg(target_arch = "x86_64")]
            Sysno::Unlink => self.unlinkat(user::path(a[0])?, 0).map(|_| 0),
            Sysno::Unlinkat => self
                .unlinkat(user::path(a[1])?, a[2] as u32)
                .map(|_| 0),
            #[cfg(target_arch = "x86_64")]
            Sysno::Rmdir => self.rmdir(user::path(a[0])?).map(|_| 0),
            Sysno::Chdir => self.chdir(user::path(a[0])?).map(|_| 0),
            Sysno::Fchdir => self.fchdir(fd(a[0])).map(|_| 0),
            Sysno::Getcwd => self.getcwd(user::slice_mut(a[0], a[1])?),

            // -----------------------------------------------------------------
            // sockets
            // -----------------------------------------------------------------
            Sysno::Socket => self
                .socket(a[0] as u32, a[1] as u32, a[2] as u32)
                .map(fd_ret),
            Sysno::Bind => {
                let local = super::socket::read_sockaddr(a[1], a[2])?;
                self.bind(fd(a[0]), local).map(|_| 0)
            }
            Sysno::Listen => self.listen(fd(a[0])).map(|_| 0),
            Sysno::Accept => self.accept_into(fd(a[0]), a[1], a[2], 0).map(fd_ret),
            Sysno::Accept4 => self
                .accept_into(fd(a[0]), a[1], a[2], a[3] as u32)
                .map(fd_ret),
            Sysno::Connect => {
                let remote = super::socket::read_sockaddr(a[1], a[2])?;
                self.connect(fd(a[0]), remote).map(|_| 0)
            }
            Sysno::Sendto => {
                let dest = match a[4] {
                    0 => None,
                    addr => Some(super::socket::read_sockaddr(addr, a[5])?),
                };
                self.send_to(fd(a[0]), user::slice(a[1], a[2])?, a[3] as u32, dest)
            }
            Sysno::Recvfrom => self.recv_from_into(
                fd(a[0]),
                user::slice_mut(a[1], a[2])?,
                a[3] as u32,
                a[4],
                a[5],
            ),
            Sysno::Sendmsg => self.sendmsg(fd(a[0]), a[1], a[2] as u32),
            Sysno::Recvmsg => self.recvmsg(fd(a[0]), a[1], a[2] as u32),
            Sysno::Shutdown => self.shutdown(fd(a[0]), a[1] as u32).map(|_| 0),
            Sysno::Getsockname => {
                let local = self.local_name(fd(a[0]))?;
                super::socket::write_sockaddr(a[1], a[2], local).map(|_| 0)
            }
            Sysno::Getpeername => {
                let remote = self.peer_name(fd(a[0]))?;
                super::socket::write_sockaddr(a[1], a[2], remote).map(|_| 0)
            }

            // -----------------------------------------------------------------
            // readiness
            // -----------------------------------------------------------------
            #[cfg(target_arch = "x86_64")]
            Sysno::EpollCreate => {
                if (a[0] as i32) <= 0 {
                    return Err(SyscallError::InvalidArgument("epoll_create size"));
                }
                self.epoll_create(0).map(fd_ret)
            }
            Sysno::EpollCreate1 => self.epoll_create(a[0] as u32).map(fd_ret),
            Sysno::EpollCtl => {
                let event = match a[3] {
                    0 => None,
                    addr => Some(user::read(addr)?),
                };
                self.epoll_ctl(fd(a[0]), a[1] as u32, fd(a[2]), event)
                    .map(|_| 0)
            }
            #[cfg(target_arch = "x86_64")]
            Sysno::EpollWait => self.epoll_wait_into(fd(a[0]), a[1], a[2] as i32, a[3] as i32),
            Sysno::EpollPwait => self.epoll_wait_into(fd(a[0]), a[1], a[2] as i32, a[3] as i32),

            // -----------------------------------------------------------------
            // identity and time
            // -----------------------------------------------------------------
            Sysno::Getpid => Ok(self.getpid() as usize),
            Sysno::Getuid | Sysno::Geteuid | Sysno::Getgid | Sysno::Getegid => Ok(0),
            Sysno::Umask => Ok(self.set_umask(a[0] as u32) as usize),
            Sysno::ClockGettime => {
                let now = self.clock_gettime(a[0] as u32)?;
                user::write::<Timespec>(a[1], now).map(|_| 0)
            }
            Sysno::Nanosleep => {
                let request = user::read::<Timespec>(a[0])?;
                self.nanosleep(request)?;
                if a[1] != 0 {
                    user::write(a[1], Timespec::default())?;
                }
                Ok(0)
            }
            Sysno::Uname => user::write::<Utsname>(a[0], self.uname()).map(|_| 0),
            Sysno::Ioctl => {
                let size = self.ioctl(fd(a[0]), a[1])?;
                user::write::<Winsize>(a[2], size).map(|_| 0)
            }

            // -----------------------------------------------------------------
            // allocator support
            // -----------------------------------------------------------------
            Sysno::Brk => Err(SyscallError::NotImplemented("brk")),
            Sysno::Mmap => self.mmap(a[0], a[1], a[3] as u32, fd(a[4])),
            Sysno::Mremap => Err(SyscallError::slots_exhausted("heap")),
            Sysno::Munmap | Sysno::Mprotect | Sysno::Madvise => Ok(0),

            // -----------------------------------------------------------------
            // deliberately ignored
            // -----------------------------------------------------------------
            Sysno::Getrlimit | Sysno::Prlimit64 | Sysno::Gettimeofday => {
                Err(SyscallError::NotImplemented("ignored"))
            }
            #[cfg(target_arch = "x86_64")]
            Sysno::Time => Err(SyscallError::NotImplemented("ignored")),
        }
    }
}

#[inline]
fn fd_ret(fd: Fd) -> usize {
    fd as usize
}

unsafe fn iovecs<'a>(addr: usize, count: usize) -> SyscallResult<&'a [IoVec]> {
    if count > IOV_MAX {
        return Err(SyscallError::InvalidArgument("too many iovec segments"));
    }
    user::array::<IoVec>(addr, count)
}
