/*!
 * Syscall Numbers
 * The recognised subset of the Linux syscall table, with printable names
 */

use linux_raw_sys::general;

macro_rules! syscall_table {
    ($( $(#[$meta:meta])* $variant:ident = $nr:ident, $name:literal; )*) => {
        /// A syscall the dispatcher knows by number
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Sysno {
            $( $(#[$meta])* $variant, )*
        }

        impl Sysno {
            /// Decode a raw syscall number
            pub fn from_raw(nr: usize) -> Option<Self> {
                let nr = u32::try_from(nr).ok()?;
                match nr {
                    $( $(#[$meta])* general::$nr => Some(Sysno::$variant), )*
                    _ => None,
                }
            }

            /// The raw number on this architecture
            pub fn raw(self) -> usize {
                match self {
                    $( $(#[$meta])* Sysno::$variant => general::$nr as usize, )*
                }
            }

            /// Human-readable name
            pub fn name(self) -> &'static str {
                match self {
                    $( $(#[$meta])* Sysno::$variant => $name, )*
                }
            }
        }
    };
}

syscall_table! {
    // files
    #[cfg(target_arch = "x86_64")]
    Open = __NR_open, "open";
    Openat = __NR_openat, "openat";
    Read = __NR_read, "read";
    Readv = __NR_readv, "readv";
    Write = __NR_write, "write";
    Writev = __NR_writev, "writev";
    Lseek = __NR_lseek, "lseek";
    Close = __NR_close, "close";
    Fcntl = __NR_fcntl, "fcntl";
    #[cfg(target_arch = "x86_64")]
    Access = __NR_access, "access";
    Faccessat = __NR_faccessat, "faccessat";
    Faccessat2 = __NR_faccessat2, "faccessat2";
    Fsync = __NR_fsync, "fsync";
    Fdatasync = __NR_fdatasync, "fdatasync";
    Truncate = __NR_truncate, "truncate";
    Ftruncate = __NR_ftruncate, "ftruncate";
    Fstat = __NR_fstat, "fstat";
    #[cfg(target_arch = "x86_64")]
    Stat = __NR_stat, "stat";
    #[cfg(target_arch = "x86_64")]
    Lstat = __NR_lstat, "lstat";
    Newfstatat = __NR_newfstatat, "newfstatat";
    Statx = __NR_statx, "statx";
    Getdents64 = __NR_getdents64, "getdents64";

    // namespace
    #[cfg(target_arch = "x86_64")]
    Mkdir = __NR_mkdir, "mkdir";
    Mkdirat = __NR_mkdirat, "mkdirat";
    #[cfg(target_arch = "x86_64")]
    Rename = __NR_rename, "rename";
    #[cfg(not(target_arch = "riscv64"))]
    Renameat = __NR_renameat, "renameat";
    Renameat2 = __NR_renameat2, "renameat2";
    #[cfg(target_arch = "x86_64")]
    Link = __NR_link, "link";
    Linkat = __NR_linkat, "linkat";
    #[cfg(target_arch = "x86_64")]
    Unlink = __NR_unlink, "unlink";
    Unlinkat = __NR_unlinkat, "unlinkat";
    #[cfg(target_arch = "x86_64")]
    Rmdir = __NR_rmdir, "rmdir";
    Chdir = __NR_chdir, "chdir";
    Fchdir = __NR_fchdir, "fchdir";
    Getcwd = __NR_getcwd, "getcwd";

    // sockets
    Socket = __NR_socket, "socket";
    Bind = __NR_bind, "bind";
    Listen = __NR_listen, "listen";
    Accept = __NR_accept, "accept";
    Accept4 = __NR_accept4, "accept4";
    Connect = __NR_connect, "connect";
    Sendto = __NR_sendto, "sendto";
    Sendmsg = __NR_sendmsg, "sendmsg";
    Recvfrom = __NR_recvfrom, "recvfrom";
    Recvmsg = __NR_recvmsg, "recvmsg";
    Shutdown = __NR_shutdown, "shutdown";
    Getsockname = __NR_getsockname, "getsockname";
    Getpeername = __NR_getpeername, "getpeername";

    // readiness
    #[cfg(target_arch = "x86_64")]
    EpollCreate = __NR_epoll_create, "epoll_create";
    EpollCreate1 = __NR_epoll_create1, "epoll_create1";
    EpollCtl = __NR_epoll_ctl, "epoll_ctl";
    #[cfg(target_arch = "x86_64")]
    EpollWait = __NR_epoll_wait, "epoll_wait";
    EpollPwait = __NR_epoll_pwait, "epoll_pwait";

    // identity and time
    Getpid = __NR_getpid, "getpid";
    Getuid = __NR_getuid, "getuid";
    Geteuid = __NR_geteuid, "geteuid";
    Getgid = __NR_getgid, "getgid";
    Getegid = __NR_getegid, "getegid";
    Umask = __NR_umask, "umask";
    ClockGettime = __NR_clock_gettime, "clock_gettime";
    Nanosleep = __NR_nanosleep, "nanosleep";
    Uname = __NR_uname, "uname";
    Ioctl = __NR_ioctl, "ioctl";

    // allocator support
    Brk = __NR_brk, "brk";
    Mmap = __NR_mmap, "mmap";
    Munmap = __NR_munmap, "munmap";
    Mremap = __NR_mremap, "mremap";
    Mprotect = __NR_mprotect, "mprotect";
    Madvise = __NR_madvise, "madvise";

    // deliberately ignored
    Getrlimit = __NR_getrlimit, "getrlimit";
    Prlimit64 = __NR_prlimit64, "prlimit64";
    Gettimeofday = __NR_gettimeofday, "gettimeofday";
    #[cfg(target_arch = "x86_64")]
    Time = __NR_time, "time";
}

/// Printable name for any syscall number, known or not
pub fn name_of(nr: usize) -> &'static str {
    Sysno::from_raw(nr).map_or("unknown", Sysno::name)
}
