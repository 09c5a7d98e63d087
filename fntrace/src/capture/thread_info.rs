//! Thread identity for sink tags
//!
//! Reads the kernel thread id and the thread's name from `/proc`, the same
//! place tools like `top -H` get them from.

use std::fs;

use crate::domain::Tid;

/// Kernel thread id of the calling thread
#[cfg(any(target_os = "linux", target_os = "android"))]
#[must_use]
pub fn current_tid() -> Tid {
    // SAFETY: gettid has no preconditions and cannot fail
    #[allow(unsafe_code)]
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    Tid(u32::try_from(tid).unwrap_or(0))
}

/// Process-unique thread number on platforms without `gettid`
#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[must_use]
pub fn current_tid() -> Tid {
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static TID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    Tid(TID.with(|tid| *tid))
}

/// Human-readable name of thread `tid` in this process
///
/// Falls back to the Rust thread name, then to the numeric id, when
/// `/proc/self/task/<tid>/comm` is unavailable.
#[must_use]
pub fn thread_name(tid: Tid) -> String {
    let comm_path = format!("/proc/self/task/{}/comm", tid.0);
    if let Ok(comm) = fs::read_to_string(comm_path) {
        let comm = comm.trim();
        if !comm.is_empty() {
            return comm.to_string();
        }
    }

    std::thread::current().name().map_or_else(|| tid.0.to_string(), str::to_string)
}
