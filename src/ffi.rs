/*!
 * C ABI Entry Points
 *
 * `__syscall0..6` and `__syscall_cp` as the C library's syscall
 * trampolines call them. All of them forward to one process-wide
 * dispatcher installed at start-up. Symbols are only exported unmangled
 * with the `export-syscalls` feature.
 */

use parking_lot::Mutex;
use std::os::raw::c_long;

use crate::abi::errno::Errno;
use crate::syscalls::Dispatcher;

static SHIM: Mutex<Option<Dispatcher>> = Mutex::new(None);

/// Install the process-wide dispatcher, returning the previous one
pub fn install(dispatcher: Dispatcher) -> Option<Dispatcher> {
    SHIM.lock().replace(dispatcher)
}

/// Remove the process-wide dispatcher
pub fn uninstall() -> Option<Dispatcher> {
    SHIM.lock().take()
}

pub fn is_installed() -> bool {
    SHIM.lock().is_some()
}

/// Run `f` against the installed dispatcher
pub fn with_dispatcher<R>(f: impl FnOnce(&mut Dispatcher) -> R) -> Option<R> {
    SHIM.lock().as_mut().map(f)
}

unsafe fn forward(n: c_long, args: [c_long; 6]) -> c_long {
    let mut shim = SHIM.lock();
    match shim.as_mut() {
        Some(dispatcher) => dispatcher.dispatch(n as usize, args.map(|a| a as usize)) as c_long,
        None => Errno::ENOSYS.as_ret() as c_long,
    }
}

/// # Safety
/// Pointer arguments must satisfy the kernel ABI of syscall `n`.
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall6(
    n: c_long,
    a: c_long,
    b: c_long,
    c: c_long,
    d: c_long,
    e: c_long,
    f: c_long,
) -> c_long {
    forward(n, [a, b, c, d, e, f])
}

/// Cancellation-point variant; cancellation is not supported
///
/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall_cp(
    n: c_long,
    a: c_long,
    b: c_long,
    c: c_long,
    d: c_long,
    e: c_long,
    f: c_long,
) -> c_long {
    forward(n, [a, b, c, d, e, f])
}

/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall0(n: c_long) -> c_long {
    forward(n, [0; 6])
}

/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall1(n: c_long, a: c_long) -> c_long {
    forward(n, [a, 0, 0, 0, 0, 0])
}

/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall2(n: c_long, a: c_long, b: c_long) -> c_long {
    forward(n, [a, b, 0, 0, 0, 0])
}

/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall3(n: c_long, a: c_long, b: c_long, c: c_long) -> c_long {
    forward(n, [a, b, c, 0, 0, 0])
}

/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall4(n: c_long, a: c_long, b: c_long, c: c_long, d: c_long) -> c_long {
    forward(n, [a, b, c, d, 0, 0])
}

/// # Safety
/// See [`__syscall6`].
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub unsafe extern "C" fn __syscall5(
    n: c_long,
    a: c_long,
    b: c_long,
    c: c_long,
    d: c_long,
    e: c_long,
) -> c_long {
    forward(n, [a, b, c, d, e, 0])
}

// =============================================================================
// TRACE CONTROL
// =============================================================================

/// Enable tracing of up to `max` calls, or disable it and drain the log
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub extern "C" fn posix_shim_trace(enable: bool, max: usize) {
    with_dispatcher(|d| {
        if enable {
            d.enable_tracing(max);
        } else {
            d.disable_tracing();
        }
    });
}

/// Nanoseconds spent in dispatched calls while tracing
#[cfg_attr(feature = "export-syscalls", no_mangle)]
pub extern "C" fn posix_shim_syscall_time() -> u64 {
    with_dispatcher(|d| d.syscall_time().as_nanos() as u64).unwrap_or(0)
}
