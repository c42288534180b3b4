/*!
 * Epoll Tests
 */

use crate::common::{addr, cstr, err, Harness};
use linux_raw_sys::general::{
    __NR_close, __NR_epoll_create1, __NR_epoll_ctl, __NR_epoll_pwait, __NR_openat, AT_FDCWD,
    EPOLLIN, EPOLL_CTL_ADD, EPOLL_CTL_DEL, O_RDONLY,
};
use posix_shim::abi::layout::EpollEvent;
use posix_shim::native::Interest;
use posix_shim::Errno;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn setup() -> (Harness, usize, usize) {
    let mut h = Harness::embedded();
    h.rt.fs.write_file("/watched", b"").unwrap();
    let path = cstr("/watched");
    let fd = h.call(
        __NR_openat,
        [AT_FDCWD as isize as usize, path.as_ptr() as usize, O_RDONLY as usize, 0, 0, 0],
    );
    let epfd = h.call(__NR_epoll_create1, [0; 6]);
    assert!(fd >= 0 && epfd >= 0);
    (h, fd as usize, epfd as usize)
}

fn pwait(h: &mut Harness, epfd: usize, events: &mut [EpollEvent], timeout: i32) -> isize {
    h.call(
        __NR_epoll_pwait,
        [epfd, events.as_mut_ptr() as usize, events.len(), timeout as isize as usize, 0, 0],
    )
}

#[test]
fn test_epoll_descriptor_range() {
    let (h, _, epfd) = setup();
    assert_eq!(epfd, h.shim.layout().first_epoll());
}

#[test]
fn test_add_then_del_leaves_no_watch() {
    let (mut h, fd, epfd) = setup();
    let ev = EpollEvent { events: EPOLLIN, data: 1 };
    assert_eq!(h.call(__NR_epoll_ctl, [epfd, EPOLL_CTL_ADD as usize, fd, addr(&ev), 0, 0]), 0);
    assert_eq!(h.call(__NR_epoll_ctl, [epfd, EPOLL_CTL_DEL as usize, fd, 0, 0, 0]), 0);
    assert!(h.shim.epoll_watches(epfd as i32).unwrap().is_empty());

    // the freed watch slot is usable again
    assert_eq!(h.call(__NR_epoll_ctl, [epfd, EPOLL_CTL_ADD as usize, fd, addr(&ev), 0, 0]), 0);
}

#[test]
fn test_zero_timeout_polls_once() {
    let (mut h, fd, epfd) = setup();
    let ev = EpollEvent { events: EPOLLIN, data: 9 };
    h.call(__NR_epoll_ctl, [epfd, EPOLL_CTL_ADD as usize, fd, addr(&ev), 0, 0]);

    let mut events = [EpollEvent::default(); 10];
    assert_eq!(pwait(&mut h, epfd, &mut events, 0), 0);
    assert_eq!(h.rt.board.waits(), vec![Some(Duration::from_nanos(1))]);

    h.rt.board.set_ready(fd as i32, Interest::INPUT);
    assert_eq!(pwait(&mut h, epfd, &mut events, 0), 1);
    let first = events[0];
    assert_eq!(({ first.events }, { first.data }), (EPOLLIN, 9));
}

#[test]
fn test_pwait_argument_errors() {
    let (mut h, fd, epfd) = setup();
    let mut events = [EpollEvent::default(); 1];
    assert_eq!(pwait(&mut h, epfd, &mut [], 0), err(Errno::EINVAL));
    assert_eq!(pwait(&mut h, fd, &mut events, 0), err(Errno::EINVAL));
    assert_eq!(pwait(&mut h, epfd + 1, &mut events, 0), err(Errno::EBADF));

    assert_eq!(h.call(__NR_close, [epfd, 0, 0, 0, 0, 0]), 0);
    assert_eq!(pwait(&mut h, epfd, &mut events, 0), err(Errno::EBADF));
}
