/*!
 * File Gateway Tests
 * Raw syscalls against the in-memory file system
 */

use crate::common::{addr, addr_mut, cstr, err, Harness};
use linux_raw_sys::general::{
    __NR_close, __NR_fstat, __NR_getcwd, __NR_lseek, __NR_mkdirat, __NR_openat, __NR_read,
    __NR_readv, __NR_renameat2, __NR_unlinkat, __NR_write, __NR_writev, AT_FDCWD, AT_REMOVEDIR,
    O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, SEEK_SET,
};
use posix_shim::abi::layout::{IoVec, KernelStat};
use posix_shim::Errno;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const CWD: usize = AT_FDCWD as isize as usize;

fn open(h: &mut Harness, path: &str, flags: u32) -> isize {
    let path = cstr(path);
    h.call(__NR_openat, [CWD, path.as_ptr() as usize, flags as usize, 0o644, 0, 0])
}

#[test]
fn test_create_write_seek_read() {
    let mut h = Harness::embedded();
    let fd = open(&mut h, "/notes.txt", O_CREAT | O_RDWR);
    assert!(fd >= 0);
    let fd = fd as usize;

    let data = b"hello shim";
    assert_eq!(h.call(__NR_write, [fd, data.as_ptr() as usize, data.len(), 0, 0, 0]), 10);
    assert_eq!(h.call(__NR_lseek, [fd, 0, SEEK_SET as usize, 0, 0, 0]), 0);

    let mut buf = [0u8; 32];
    let n = h.call(__NR_read, [fd, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]);
    assert_eq!(&buf[..n as usize], data);
    assert_eq!(h.call(__NR_read, [fd, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]), 0);

    let mut st = KernelStat::default();
    assert_eq!(h.call(__NR_fstat, [fd, addr_mut(&mut st), 0, 0, 0, 0]), 0);
    assert_eq!(st.st_size, 10);

    assert_eq!(h.call(__NR_close, [fd, 0, 0, 0, 0, 0]), 0);
    assert_eq!(h.call(__NR_close, [fd, 0, 0, 0, 0, 0]), err(Errno::EBADF));
    assert_eq!(h.rt.fs.read_file("/notes.txt").unwrap(), data);
}

#[test]
fn test_exclusive_create_and_missing_file() {
    let mut h = Harness::embedded();
    h.rt.fs.write_file("/a", b"").unwrap();
    assert_eq!(open(&mut h, "/a", O_CREAT | O_EXCL | O_RDWR), err(Errno::EEXIST));
    assert_eq!(open(&mut h, "/missing", O_RDONLY), err(Errno::ENOENT));
}

#[test]
fn test_gather_write_and_scatter_read() {
    let mut h = Harness::embedded();
    let fd = open(&mut h, "/v", O_CREAT | O_RDWR) as usize;

    let (a, b) = (b"abc".as_slice(), b"defg".as_slice());
    let out = [
        IoVec { iov_base: a.as_ptr() as usize, iov_len: a.len() },
        IoVec { iov_base: b.as_ptr() as usize, iov_len: b.len() },
    ];
    assert_eq!(h.call(__NR_writev, [fd, addr(&out), 2, 0, 0, 0]), 7);
    h.call(__NR_lseek, [fd, 0, SEEK_SET as usize, 0, 0, 0]);

    let mut x = [0u8; 2];
    let mut y = [0u8; 8];
    let iov = [
        IoVec { iov_base: x.as_mut_ptr() as usize, iov_len: x.len() },
        IoVec { iov_base: y.as_mut_ptr() as usize, iov_len: y.len() },
    ];
    assert_eq!(h.call(__NR_readv, [fd, addr(&iov), 2, 0, 0, 0]), 7);
    assert_eq!(&x, b"ab");
    assert_eq!(&y[..5], b"cdefg");

    assert_eq!(h.call(__NR_readv, [fd, addr(&iov), 5000, 0, 0, 0]), err(Errno::EINVAL));
}

#[test]
fn test_namespace_calls() {
    let mut h = Harness::embedded();
    let dir = cstr("/d");
    assert_eq!(h.call(__NR_mkdirat, [CWD, dir.as_ptr() as usize, 0o755, 0, 0, 0]), 0);
    h.rt.fs.write_file("/d/f", b"1").unwrap();

    let (old, new) = (cstr("/d/f"), cstr("/d/g"));
    let rename = [CWD, old.as_ptr() as usize, CWD, new.as_ptr() as usize, 0, 0];
    assert_eq!(h.call(__NR_renameat2, rename), 0);
    assert!(h.rt.fs.exists("/d/g"));

    let remove_dir = [CWD, dir.as_ptr() as usize, AT_REMOVEDIR as usize, 0, 0, 0];
    assert_eq!(h.call(__NR_unlinkat, remove_dir), err(Errno::ENOTEMPTY));
    assert_eq!(h.call(__NR_unlinkat, [CWD, new.as_ptr() as usize, 0, 0, 0, 0]), 0);
    assert_eq!(h.call(__NR_unlinkat, remove_dir), 0);
}

#[test]
fn test_getcwd_length_and_range() {
    let mut h = Harness::embedded();
    let mut buf = [0u8; 16];
    assert_eq!(h.call(__NR_getcwd, [buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0, 0]), 2);
    assert_eq!(&buf[..2], b"/\0");
    assert_eq!(h.call(__NR_getcwd, [buf.as_mut_ptr() as usize, 1, 0, 0, 0, 0]), err(Errno::ERANGE));
}

#[test]
fn test_null_pointer_is_efault() {
    let mut h = Harness::embedded();
    assert_eq!(h.call(__NR_openat, [CWD, 0, 0, 0, 0, 0]), err(Errno::EFAULT));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Bytes written through one descriptor read back through a fresh one
    #[test]
    fn prop_write_close_reopen_read(data in prop::collection::vec(any::<u8>(), 0..8192)) {
        let mut h = Harness::embedded();
        let fd = open(&mut h, "/blob", O_CREAT | O_WRONLY | O_TRUNC);
        prop_assert!(fd >= 0);
        let fd = fd as usize;
        let written = h.call(__NR_write, [fd, data.as_ptr() as usize, data.len(), 0, 0, 0]);
        prop_assert_eq!(written, data.len() as isize);
        prop_assert_eq!(h.call(__NR_close, [fd, 0, 0, 0, 0, 0]), 0);

        let fd = open(&mut h, "/blob", O_RDONLY);
        prop_assert!(fd >= 0);
        let fd = fd as usize;
        let mut back = vec![0u8; data.len() + 16];
        let mut total = 0;
        loop {
            let rest = &mut back[total..];
            let n = h.call(__NR_read, [fd, rest.as_mut_ptr() as usize, rest.len(), 0, 0, 0]);
            prop_assert!(n >= 0);
            if n == 0 {
                break;
            }
            total += n as usize;
        }
        prop_assert_eq!(&back[..total], &data[..]);
        prop_assert_eq!(h.call(__NR_close, [fd, 0, 0, 0, 0, 0]), 0);
    }
}
