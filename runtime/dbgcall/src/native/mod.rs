//! Native Linux backends
//!
//! - [`Tgkill`]: delivers `SIGTRAP` to one thread of this process
//! - [`UcontextAarch64`]: execution context over a signal handler's
//!   `ucontext_t` (aarch64 only)

use std::io;

use crate::unit::{ThreadId, ThreadSignaler};

#[cfg(target_arch = "aarch64")]
mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::UcontextAarch64;

/// Signal used to enter the trap handler
pub const TRAP_SIGNAL: libc::c_int = libc::SIGTRAP;

/// Sends [`TRAP_SIGNAL`] to a thread of the current process via `tgkill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Tgkill;

impl ThreadSignaler for Tgkill {
    fn signal(&self, tid: ThreadId) -> io::Result<()> {
        // SAFETY: plain syscall, no memory arguments
        let ret = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                libc::getpid(),
                tid.0 as libc::c_long,
                TRAP_SIGNAL as libc::c_long,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Kernel thread id of the calling thread
pub fn current_thread_id() -> ThreadId {
    // SAFETY: gettid never fails
    ThreadId(unsafe { libc::syscall(libc::SYS_gettid) } as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_thread_id_is_positive() {
        assert!(current_thread_id().0 > 0);
    }

    #[test]
    fn invalid_tid_reports_os_error() {
        let err = Tgkill.signal(ThreadId(-1)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }
}
