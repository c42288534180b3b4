/*!
 * Miscellaneous Syscalls
 * Identity, time, uname and terminal size
 */

use linux_raw_sys::general::{CLOCK_MONOTONIC, CLOCK_REALTIME};
use std::time::Duration;

use super::Dispatcher;
use crate::abi::layout::{fill_uts_field, Timespec, Utsname, Winsize, TIOCGWINSZ};
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::types::Fd;

const NANOS_PER_SEC: i64 = 1_000_000_000;

impl Dispatcher {
    pub fn getpid(&self) -> u32 {
        self.env.activity_id()
    }

    /// Install a new file creation mask and return the previous one
    pub fn set_umask(&mut self, mask: u32) -> u32 {
        std::mem::replace(&mut self.umask, mask & 0o777)
    }

    pub fn umask(&self) -> u32 {
        self.umask
    }

    /// Realtime and monotonic both read the native clock since boot
    pub fn clock_gettime(&self, clock: u32) -> SyscallResult<Timespec> {
        if clock != CLOCK_REALTIME as u32 && clock != CLOCK_MONOTONIC as u32 {
            return Err(SyscallError::Unsupported("clock id"));
        }
        let now = self.env.now();
        Ok(Timespec {
            tv_sec: now.as_secs() as i64,
            tv_nsec: now.subsec_nanos() as i64,
        })
    }

    pub fn nanosleep(&mut self, request: Timespec) -> SyscallResult<()> {
        if request.tv_sec < 0 || !(0..NANOS_PER_SEC).contains(&request.tv_nsec) {
            return Err(SyscallError::InvalidArgument("timespec"));
        }
        let duration = Duration::new(request.tv_sec as u64, request.tv_nsec as u32);
        self.env.sleep_for(duration);
        Ok(())
    }

    pub fn uname(&self) -> Utsname {
        let info = &self.config.uname;
        let mut uts = Utsname::default();
        fill_uts_field(&mut uts.sysname, &info.sysname);
        fill_uts_field(&mut uts.nodename, &info.nodename);
        fill_uts_field(&mut uts.release, &info.release);
        fill_uts_field(&mut uts.version, &info.version);
        fill_uts_field(&mut uts.machine, &info.machine);
        fill_uts_field(&mut uts.domainname, &info.domainname);
        uts
    }

    /// Only `TIOCGWINSZ`, answered from the configured terminal size
    pub fn ioctl(&self, _fd: Fd, request: usize) -> SyscallResult<Winsize> {
        if request != TIOCGWINSZ {
            return Err(SyscallError::NotImplemented("ioctl request"));
        }
        Ok(Winsize {
            ws_row: self.config.term_rows,
            ws_col: self.config.term_cols,
            ..Winsize::default()
        })
    }
}
