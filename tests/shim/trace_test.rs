/*!
 * Dispatcher and Tracing Tests
 */

use crate::common::{addr, err, Harness};
use linux_raw_sys::general::{__NR_getpid, __NR_ioctl, __NR_nanosleep, __NR_uname};
use posix_shim::abi::layout::{Timespec, Utsname, Winsize, TIOCGWINSZ};
use posix_shim::{Errno, ShimConfig};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn sleep(h: &mut Harness, nanos: i64) -> isize {
    let req = Timespec { tv_sec: 0, tv_nsec: nanos };
    h.call(__NR_nanosleep, [addr(&req), 0, 0, 0, 0, 0])
}

#[test]
fn test_trace_log_drains_in_call_order() {
    let mut h = Harness::embedded();
    h.shim.enable_tracing(2);
    assert_eq!(sleep(&mut h, 100), 0);
    h.call(__NR_getpid, [0; 6]);
    assert_eq!(sleep(&mut h, 300), 0);

    // the third call is timed but not recorded
    assert_eq!(h.shim.syscall_time(), Duration::from_nanos(400));
    let entries = h.shim.disable_tracing();
    assert_eq!(entries.len(), 2);

    let lines = h.rt.env.debug_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[   0] nanosleep("));
    assert!(lines[0].ends_with(" 100 ns"));
    assert!(lines[1].starts_with("[   1] getpid("));
}

#[test]
fn test_tracing_off_records_nothing() {
    let mut h = Harness::embedded();
    sleep(&mut h, 50);
    assert_eq!(h.shim.syscall_time(), Duration::ZERO);
    assert!(h.shim.disable_tracing().is_empty());
    assert!(h.rt.env.debug_lines().is_empty());
}

#[test]
fn test_unknown_syscall_line() {
    let mut h = Harness::embedded();
    assert_eq!(h.call(4242, [1, 2, 3, 4, 5, usize::MAX]), err(Errno::ENOSYS));
    assert_eq!(h.rt.env.debug_lines(), vec!["unknown syscall(4242, 1, 2, 3, 4, 5, -1)"]);

    let mut quiet = Harness::new(ShimConfig::minimal());
    assert_eq!(quiet.call(4242, [0; 6]), err(Errno::ENOSYS));
    assert!(quiet.rt.env.debug_lines().is_empty());
}

#[test]
fn test_uname_and_window_size() {
    let mut h = Harness::embedded();
    let mut uts = Utsname::default();
    assert_eq!(h.call(__NR_uname, [&mut uts as *mut Utsname as usize, 0, 0, 0, 0, 0]), 0);
    assert_eq!(&uts.release[..7], b"latest\0");

    let mut ws = Winsize::default();
    let ioctl = [1, TIOCGWINSZ, &mut ws as *mut Winsize as usize, 0, 0, 0];
    assert_eq!(h.call(__NR_ioctl, ioctl), 0);
    assert_eq!((ws.ws_row, ws.ws_col), (24, 80));
    assert_eq!(h.call(__NR_ioctl, [1, 0x5401, 0, 0, 0, 0]), err(Errno::ENOSYS));
}
