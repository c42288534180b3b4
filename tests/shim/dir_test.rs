/*!
 * Directory Iteration Tests
 */

use crate::common::{cstr, err, Harness};
use linux_raw_sys::general::{__NR_close, __NR_getdents64, __NR_openat, AT_FDCWD, O_RDONLY};
use posix_shim::abi::layout::dirent64_reclen;
use posix_shim::Errno;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;

const CWD: usize = AT_FDCWD as isize as usize;

fn open_dir(h: &mut Harness, path: &str) -> usize {
    let path = cstr(path);
    let fd = h.call(__NR_openat, [CWD, path.as_ptr() as usize, O_RDONLY as usize, 0, 0, 0]);
    assert!(fd >= 0, "open {fd}");
    fd as usize
}

fn getdents(h: &mut Harness, fd: usize, buf: &mut [u8]) -> isize {
    h.call(__NR_getdents64, [fd, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0])
}

/// Names in one getdents64 result
fn parse(buf: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut off = 0;
    while off < buf.len() {
        let reclen = u16::from_ne_bytes([buf[off + 16], buf[off + 17]]) as usize;
        let name = &buf[off + 19..off + reclen];
        let end = name.iter().position(|&b| b == 0).unwrap();
        names.push(String::from_utf8(name[..end].to_vec()).unwrap());
        off += reclen;
    }
    names
}

/// Drain the directory with a fixed buffer size
fn list(h: &mut Harness, path: &str, buf_len: usize) -> Vec<String> {
    let fd = open_dir(h, path);
    let mut buf = vec![0u8; buf_len];
    let mut names = Vec::new();
    loop {
        let n = getdents(h, fd, &mut buf);
        assert!(n >= 0, "getdents failed: {n}");
        if n == 0 {
            break;
        }
        names.extend(parse(&buf[..n as usize]));
    }
    assert_eq!(getdents(h, fd, &mut buf), 0);
    h.call(__NR_close, [fd, 0, 0, 0, 0, 0]);
    names
}

#[test]
fn test_lists_dot_entries_and_children() {
    let mut h = Harness::embedded();
    h.rt.fs.create_dir("/d").unwrap();
    h.rt.fs.write_file("/d/one", b"1").unwrap();
    h.rt.fs.create_dir("/d/two").unwrap();
    h.rt.fs.write_file("/d/two/nested", b"").unwrap();

    let names: BTreeSet<String> = list(&mut h, "/d", 4096).into_iter().collect();
    let expected: BTreeSet<String> = [".", "..", "one", "two"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_buffer_too_small_for_first_record() {
    let mut h = Harness::embedded();
    h.rt.fs.create_dir("/d").unwrap();
    let fd = open_dir(&mut h, "/d");
    let mut tiny = [0u8; 8];
    assert_eq!(getdents(&mut h, fd, &mut tiny), err(Errno::EINVAL));

    let mut buf = [0u8; 256];
    let n = getdents(&mut h, fd, &mut buf) as usize;
    assert_eq!(parse(&buf[..n]), vec![".", ".."]);
}

#[test]
fn test_regular_file_is_not_a_directory() {
    let mut h = Harness::embedded();
    h.rt.fs.write_file("/f", b"x").unwrap();
    let fd = open_dir(&mut h, "/f");
    let mut buf = [0u8; 256];
    assert_eq!(getdents(&mut h, fd, &mut buf), err(Errno::ENOTDIR));
}

#[test]
fn test_reopen_restarts_iteration() {
    let mut h = Harness::embedded();
    h.rt.fs.create_dir("/d").unwrap();
    h.rt.fs.write_file("/d/x", b"").unwrap();
    let first = list(&mut h, "/d", 64);
    let second = list(&mut h, "/d", 64);
    assert_eq!(first, second);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every entry shows up exactly once, whatever the buffer size
    #[test]
    fn prop_getdents_is_complete(
        names in prop::collection::btree_set("[a-z]{1,24}", 0..20),
        slack in 0usize..200,
    ) {
        let mut h = Harness::embedded();
        h.rt.fs.create_dir("/p").unwrap();
        for name in &names {
            h.rt.fs.write_file(&format!("/p/{name}"), b"").unwrap();
        }
        let longest = names.iter().map(String::len).max().unwrap_or(2).max(2);
        let buf_len = dirent64_reclen(longest) + slack;

        let listed = list(&mut h, "/p", buf_len);
        let unique: BTreeSet<&String> = listed.iter().collect();
        prop_assert_eq!(unique.len(), listed.len());

        let mut expected: BTreeSet<String> = names.clone();
        expected.insert(".".into());
        expected.insert("..".into());
        let got: BTreeSet<String> = listed.into_iter().collect();
        prop_assert_eq!(got, expected);
    }
}
