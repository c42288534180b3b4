/*!
 * Linux ABI
 * Numbers and layouts the C library decodes bit-for-bit
 */

pub mod errno;
pub mod layout;
pub mod sysno;
pub mod user;

pub use errno::Errno;
pub use sysno::Sysno;
