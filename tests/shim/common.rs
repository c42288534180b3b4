/*!
 * Shared test harness
 */

use posix_shim::native::memory::MemoryRuntime;
use posix_shim::{Dispatcher, ShimConfig};
use std::ffi::CString;

/// One dispatcher on top of an in-memory runtime
pub struct Harness {
    pub shim: Dispatcher,
    pub rt: MemoryRuntime,
}

impl Harness {
    pub fn new(config: ShimConfig) -> Self {
        let rt = MemoryRuntime::new(1, config.max_fds);
        Self::with_runtime(config, rt)
    }

    pub fn with_runtime(config: ShimConfig, rt: MemoryRuntime) -> Self {
        Self {
            shim: Dispatcher::new(config, rt.collaborators()),
            rt,
        }
    }

    pub fn embedded() -> Self {
        Self::new(ShimConfig::embedded())
    }

    /// Issue a raw syscall the way the C library would
    pub fn call(&mut self, nr: u32, args: [usize; 6]) -> isize {
        unsafe { self.shim.dispatch(nr as usize, args) }
    }
}

pub fn cstr(s: &str) -> CString {
    CString::new(s).unwrap()
}

pub fn addr<T>(value: &T) -> usize {
    value as *const T as usize
}

pub fn addr_mut<T>(value: &mut T) -> usize {
    value as *mut T as usize
}

/// Negated errno as a raw syscall return
pub fn err(errno: posix_shim::Errno) -> isize {
    errno.as_ret()
}
