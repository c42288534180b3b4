/*!
 * Syscalls Module
 * Translation of Linux syscalls onto the native collaborators
 */

mod descriptors;
mod dir;
mod dispatcher;
mod epoll;
mod fs;
mod heap;
mod misc;
mod socket;
mod stat;
mod trace;

pub use descriptors::Descriptor;
pub use dir::OpenDir;
pub use dispatcher::Dispatcher;
pub use epoll::{events_from_interest, interest_from_events, Watch};
pub use fs::open_mode;
pub use heap::HeapArea;
pub use socket::{endpoint_from_sockaddr, read_sockaddr, sockaddr_from_endpoint, write_sockaddr};
pub use stat::{kernel_stat, statx};
pub use trace::TraceEntry;
