/*!
 * Limits and Constants
 *
 * Table sizes and fixed values. The tables are sized for an embedded
 * activity; every "table full" condition is an ordinary error result.
 */

// =============================================================================
// DESCRIPTOR SPACE
// =============================================================================

/// Size of the native file table; regular descriptors are `0..MAX_FDS`
pub const DEFAULT_MAX_FDS: usize = 64;

/// Socket slots, numbered from `MAX_FDS` upwards
pub const DEFAULT_MAX_SOCKETS: usize = 32;

/// Descriptors that may have directory iteration state
pub const DEFAULT_MAX_DIRS: usize = 16;

/// Epoll instances, numbered after the socket range
pub const DEFAULT_MAX_EPOLL_INSTANCES: usize = 4;

/// Descriptors one epoll instance can watch
pub const DEFAULT_MAX_EPOLL_WATCHES: usize = 8;

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Block size reported by stat; block counts are derived from it
pub const STAT_BLOCK_SIZE: u64 = 4096;

/// Longest path accepted from the C library, including the NUL
pub const PATH_MAX: usize = 4096;

// =============================================================================
// MEMORY
// =============================================================================

/// Granularity of the heap shim
pub const PAGE_SIZE: usize = 4096;

// =============================================================================
// TERMINAL
// =============================================================================

pub const DEFAULT_TERM_COLS: u16 = 80;
pub const DEFAULT_TERM_ROWS: u16 = 24;

/// Mask reported by the first umask call
pub const DEFAULT_UMASK: u32 = 0o022;
