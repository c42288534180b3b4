/*!
 * Heap Shim
 *
 * The C allocator gets its memory through anonymous `mmap`. Mappings are
 * carved bump-style out of one area installed at start-up and never
 * returned; `munmap` and friends are accepted as no-ops.
 */

use linux_raw_sys::general::MAP_ANONYMOUS;
use tracing::{debug, warn};

use super::Dispatcher;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::limits::PAGE_SIZE;
use crate::core::types::Fd;

/// Bump region `[next, end)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapArea {
    pub begin: usize,
    pub next: usize,
    pub end: usize,
}

impl HeapArea {
    pub fn new(begin: usize, end: usize) -> Self {
        Self {
            begin,
            next: begin,
            end,
        }
    }

    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.next)
    }

    /// Reserve `len` bytes rounded up to whole pages
    pub fn reserve(&mut self, len: usize) -> Option<usize> {
        let len = len.checked_add(PAGE_SIZE - 1)? & !(PAGE_SIZE - 1);
        if len == 0 || len > self.remaining() {
            return None;
        }
        let start = self.next;
        self.next += len;
        Some(start)
    }
}

impl Dispatcher {
    /// Install the memory the heap shim hands out
    pub fn set_heap_area(&mut self, begin: usize, end: usize) {
        debug!(begin, end, "heap area installed");
        self.heap = HeapArea::new(begin, end);
    }

    pub fn heap_area(&self) -> HeapArea {
        self.heap
    }

    /// Grow the heap area by `pages` pages directly after its end
    ///
    /// The area is left unchanged if the new end would overflow.
    pub fn extend_heap(&mut self, pages: usize) {
        match pages
            .checked_mul(PAGE_SIZE)
            .and_then(|len| self.heap.end.checked_add(len))
        {
            Some(end) => self.heap.end = end,
            None => warn!(pages, end = self.heap.end, "heap extension overflows"),
        }
    }

    /// Anonymous mapping from the heap area, zero-filled
    ///
    /// Fixed-address requests fail so the allocator falls back to
    /// unconstrained placement.
    ///
    /// # Safety
    /// The installed heap area must be memory owned by this process.
    pub unsafe fn mmap(&mut self, addr: usize, len: usize, flags: u32, fd: Fd) -> SyscallResult<usize> {
        if addr != 0 {
            return Err(SyscallError::slots_exhausted("heap"));
        }
        if flags & MAP_ANONYMOUS as u32 == 0 {
            warn!(fd, "file-backed mmap rejected");
            return Err(SyscallError::NotImplemented("file-backed mmap"));
        }

        let start = self
            .heap
            .reserve(len)
            .ok_or(SyscallError::slots_exhausted("heap"))?;
        let len = self.heap.next - start;
        std::ptr::write_bytes(start as *mut u8, 0, len);
        debug!(start, len, remaining = self.heap.remaining(), "heap mapping");
        Ok(start)
    }
}
