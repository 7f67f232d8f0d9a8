//! Best-effort scheduling boost for the worker thread.
//!
//! Linux tries `SCHED_FIFO` at a moderate priority first (needs `CAP_SYS_NICE`
//! or an `RLIMIT_RTPRIO` grant), then a negative nice value for the calling
//! thread. Windows raises the thread to `THREAD_PRIORITY_HIGHEST`. Failure is
//! never fatal; the worker just keeps the priority it inherited.

use std::fmt;
use std::io;

/// `SCHED_FIFO` priority; well below the 50 kernel IRQ threads default to.
#[cfg(target_os = "linux")]
pub(crate) const FIFO_PRIORITY: i32 = 10;
/// Nice value used when real-time scheduling is refused.
#[cfg(target_os = "linux")]
pub(crate) const FALLBACK_NICE: i32 = -5;

/// What the elevation call achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Elevation {
    /// Real-time FIFO scheduling at this priority.
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    Fifo(i32),
    /// Normal scheduling with this nice value.
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    Nice(i32),
    /// Windows thread priority level.
    #[cfg_attr(not(windows), allow(dead_code))]
    ThreadPriority(i32),
}

impl fmt::Display for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elevation::Fifo(p) => write!(f, "SCHED_FIFO priority {p}"),
            Elevation::Nice(n) => write!(f, "nice {n}"),
            Elevation::ThreadPriority(p) => write!(f, "thread priority {p}"),
        }
    }
}

/// Kernel id of the calling thread.
#[cfg(target_os = "linux")]
pub(crate) fn current_tid() -> libc::id_t {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as libc::id_t }
}

/// Raise the scheduling priority of the calling thread.
#[cfg(target_os = "linux")]
pub(crate) fn elevate_current_thread() -> io::Result<Elevation> {
    let param = libc::sched_param {
        sched_priority: FIFO_PRIORITY,
    };
    // SAFETY: pid 0 is the calling thread; `param` outlives the call.
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } == 0 {
        return Ok(Elevation::Fifo(FIFO_PRIORITY));
    }
    let fifo_err = io::Error::last_os_error();

    // On Linux PRIO_PROCESS with a thread id applies to that thread only.
    // SAFETY: plain syscall on our own thread id.
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, current_tid(), FALLBACK_NICE) } == 0 {
        return Ok(Elevation::Nice(FALLBACK_NICE));
    }
    let nice_err = io::Error::last_os_error();
    Err(io::Error::new(
        nice_err.kind(),
        format!("SCHED_FIFO: {fifo_err}; nice {FALLBACK_NICE}: {nice_err}"),
    ))
}

#[cfg(windows)]
pub(crate) fn elevate_current_thread() -> io::Result<Elevation> {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_HIGHEST,
    };
    // SAFETY: the pseudo handle from GetCurrentThread needs no closing.
    if unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_HIGHEST) } != 0 {
        Ok(Elevation::ThreadPriority(THREAD_PRIORITY_HIGHEST))
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
pub(crate) fn elevate_current_thread() -> io::Result<Elevation> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no thread priority API on this platform",
    ))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn reported_elevation_matches_the_scheduler() {
        let outcome = std::thread::spawn(|| {
            let outcome = elevate_current_thread();
            // SAFETY: queries on the calling thread only.
            let policy = unsafe { libc::sched_getscheduler(0) };
            let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, current_tid()) };
            (outcome.ok(), policy, nice)
        })
        .join()
        .expect("thread");

        match outcome {
            (Some(Elevation::Fifo(p)), policy, _) => {
                assert_eq!(p, FIFO_PRIORITY);
                assert_eq!(policy, libc::SCHED_FIFO);
            }
            (Some(Elevation::Nice(n)), policy, nice) => {
                assert_ne!(policy, libc::SCHED_FIFO);
                assert_eq!(nice, n);
            }
            // Unprivileged and no nice headroom: nothing changed.
            (None, policy, _) => assert_ne!(policy, libc::SCHED_FIFO),
            (Some(other), _, _) => panic!("unexpected elevation on Linux: {other}"),
        }
    }
}
