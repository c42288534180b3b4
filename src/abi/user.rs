/*!
 * User Memory Access
 *
 * The C library lives in the same address space as the shim, so syscall
 * pointer arguments are dereferenced directly. These helpers do the null
 * and overflow checks and turn raw words into slices and values; a bad
 * pointer is reported as `EFAULT`, never dereferenced.
 *
 * Every function is `unsafe`: the caller vouches that a non-null range is
 * mapped and valid for the access for the duration of the syscall.
 */

use std::ffi::CStr;
use std::mem::{align_of, size_of};

use crate::abi::errno::Errno;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::limits::PATH_MAX;

#[inline]
fn check_range(addr: usize, len: usize) -> SyscallResult<()> {
    if addr == 0 || len > isize::MAX as usize || addr.checked_add(len).is_none() {
        return Err(SyscallError::Fault);
    }
    Ok(())
}

/// Borrow `len` bytes at `addr` for reading
///
/// # Safety
/// A non-empty range must be valid for reads.
pub unsafe fn slice<'a>(addr: usize, len: usize) -> SyscallResult<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    check_range(addr, len)?;
    Ok(std::slice::from_raw_parts(addr as *const u8, len))
}

/// Borrow `len` bytes at `addr` for writing
///
/// # Safety
/// A non-empty range must be valid for writes and not aliased.
pub unsafe fn slice_mut<'a>(addr: usize, len: usize) -> SyscallResult<&'a mut [u8]> {
    if len == 0 {
        return Ok(&mut []);
    }
    check_range(addr, len)?;
    Ok(std::slice::from_raw_parts_mut(addr as *mut u8, len))
}

/// Borrow an array of `count` values of `T`
///
/// # Safety
/// A non-empty range must hold `count` initialised values of `T`.
pub unsafe fn array<'a, T>(addr: usize, count: usize) -> SyscallResult<&'a [T]> {
    if count == 0 {
        return Ok(&[]);
    }
    let bytes = count
        .checked_mul(size_of::<T>())
        .ok_or(SyscallError::Fault)?;
    check_range(addr, bytes)?;
    if addr % align_of::<T>() != 0 {
        return Err(SyscallError::Fault);
    }
    Ok(std::slice::from_raw_parts(addr as *const T, count))
}

/// Copy a `T` in from user memory
///
/// # Safety
/// `addr` must point to a readable, initialised `T` (alignment not required).
pub unsafe fn read<T: Copy>(addr: usize) -> SyscallResult<T> {
    check_range(addr, size_of::<T>())?;
    Ok(std::ptr::read_unaligned(addr as *const T))
}

/// Copy a `T` out to user memory
///
/// # Safety
/// `addr` must point to writable memory of at least `size_of::<T>()` bytes.
pub unsafe fn write<T: Copy>(addr: usize, value: T) -> SyscallResult<()> {
    check_range(addr, size_of::<T>())?;
    std::ptr::write_unaligned(addr as *mut T, value);
    Ok(())
}

/// Borrow a NUL-terminated path
///
/// # Safety
/// `addr` must point to a NUL-terminated string.
pub unsafe fn path<'a>(addr: usize) -> SyscallResult<&'a str> {
    check_range(addr, 1)?;
    let cstr = CStr::from_ptr(addr as *const std::ffi::c_char);
    if cstr.to_bytes().len() >= PATH_MAX {
        return Err(SyscallError::Posix(Errno::ENAMETOOLONG));
    }
    cstr.to_str()
        .map_err(|_| SyscallError::InvalidArgument("path is not valid UTF-8"))
}

/// Like [`path`], but a null pointer reads as the empty path
///
/// # Safety
/// A non-null `addr` must point to a NUL-terminated string.
pub unsafe fn path_or_empty<'a>(addr: usize) -> SyscallResult<&'a str> {
    if addr == 0 {
        return Ok("");
    }
    path(addr)
}

/// View a plain-old-data value as bytes
pub fn bytes_of<T: Copy>(value: &T) -> &[u8] {
    // SAFETY: `T: Copy` values used here are `#[repr(C)]` structs without
    // interior pointers; reading their bytes is always defined.
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}
