/*!
 * Errno Translation Tests
 * Native errors surface exactly once, as their POSIX image
 */

use crate::common::{cstr, err};
use linux_raw_sys::general::{__NR_fstat, __NR_openat, __NR_read, __NR_unlinkat, AT_FDCWD};
use posix_shim::abi::errno::translate;
use posix_shim::native::memory::{ManualClock, ManualEnv, ReadyBoard};
use posix_shim::native::{
    Collaborators, DirStream, FileInfo, FileSystem, NativeResult, OpenMode, SeekOrigin,
};
use posix_shim::{Dispatcher, Errno, Fd, NativeError, ShimConfig, SyscallError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const CWD: usize = AT_FDCWD as isize as usize;

/// File system where every operation fails with one code
struct FailingFs(NativeError);

impl FileSystem for FailingFs {
    fn open(&mut self, _: &str, _: OpenMode) -> NativeResult<Fd> {
        Err(self.0)
    }
    fn close(&mut self, _: Fd) -> NativeResult<()> {
        Err(self.0)
    }
    fn read(&mut self, _: Fd, _: &mut [u8]) -> NativeResult<Option<usize>> {
        Err(self.0)
    }
    fn write(&mut self, _: Fd, _: &[u8]) -> NativeResult<Option<usize>> {
        Err(self.0)
    }
    fn seek(&mut self, _: Fd, _: i64, _: SeekOrigin) -> NativeResult<u64> {
        Err(self.0)
    }
    fn truncate(&mut self, _: Fd, _: u64) -> NativeResult<()> {
        Err(self.0)
    }
    fn sync(&mut self, _: Fd) -> NativeResult<()> {
        Err(self.0)
    }
    fn stat(&mut self, _: &str) -> NativeResult<FileInfo> {
        Err(self.0)
    }
    fn fstat(&mut self, _: Fd) -> NativeResult<FileInfo> {
        Err(self.0)
    }
    fn mkdir(&mut self, _: &str, _: u32) -> NativeResult<()> {
        Err(self.0)
    }
    fn rmdir(&mut self, _: &str) -> NativeResult<()> {
        Err(self.0)
    }
    fn rename(&mut self, _: &str, _: &str) -> NativeResult<()> {
        Err(self.0)
    }
    fn link(&mut self, _: &str, _: &str) -> NativeResult<()> {
        Err(self.0)
    }
    fn unlink(&mut self, _: &str) -> NativeResult<()> {
        Err(self.0)
    }
    fn open_dir(&mut self, _: Fd) -> NativeResult<Box<dyn DirStream>> {
        Err(self.0)
    }
    fn chdir(&mut self, _: &str) -> NativeResult<()> {
        Err(self.0)
    }
    fn fchdir(&mut self, _: Fd) -> NativeResult<()> {
        Err(self.0)
    }
    fn getcwd(&mut self) -> NativeResult<String> {
        Err(self.0)
    }
    /// Descriptor 3 looks open so fd-based calls reach the native layer
    fn is_open(&self, fd: Fd) -> bool {
        fd == 3
    }
}

fn failing(code: NativeError) -> Dispatcher {
    let collaborators = Collaborators::new(
        Box::new(FailingFs(code)),
        Box::new(ReadyBoard::new()),
        Box::new(ManualEnv::new(1, ManualClock::new())),
    );
    Dispatcher::new(ShimConfig::minimal(), collaborators)
}

#[test]
fn test_every_mapped_code_is_a_distinct_errno() {
    let mapped: Vec<Errno> = NativeError::ALL
        .iter()
        .filter(|code| !code.is_unmapped())
        .map(|&code| translate(code))
        .collect();
    let mut unique = mapped.clone();
    unique.sort_by_key(|e| e.raw());
    unique.dedup();
    assert_eq!(unique.len(), mapped.len());
    assert!(mapped.iter().all(|&e| e != Errno::ENOSYS));
}

#[test]
fn test_unmapped_codes_are_enosys() {
    assert_eq!(translate(NativeError::NoFreeTile), Errno::ENOSYS);
    assert_eq!(translate(NativeError::Unspecified), Errno::ENOSYS);
}

#[test]
fn test_would_block_is_eagain() {
    assert_eq!(SyscallError::WouldBlock.errno(), Errno::EAGAIN);
    assert_eq!(translate(NativeError::WouldBlock), Errno::EWOULDBLOCK);
}

proptest! {
    /// Whatever the native layer reports comes back as exactly its errno image
    #[test]
    fn prop_native_errors_translate_once(idx in 0..NativeError::ALL.len(), which in 0..4usize) {
        let code = NativeError::ALL[idx];
        let mut shim = failing(code);
        let path = cstr("/x");
        let mut buf = [0u8; 8];
        let mut st = [0u8; 256];
        let args = match which {
            0 => (__NR_openat, [CWD, path.as_ptr() as usize, 0, 0, 0, 0]),
            1 => (__NR_read, [3, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]),
            2 => (__NR_fstat, [3, st.as_mut_ptr() as usize, 0, 0, 0, 0]),
            _ => (__NR_unlinkat, [CWD, path.as_ptr() as usize, 0, 0, 0, 0]),
        };
        let ret = unsafe { shim.dispatch(args.0 as usize, args.1) };
        prop_assert_eq!(ret, err(translate(code)));
        prop_assert_eq!(SyscallError::from(code).errno(), translate(code));
    }
}
