use std::future::Future;
use std::io;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Set the scheduling nice value of the calling thread.
#[cfg(target_os = "linux")]
pub fn set_current_thread_nice(nice: i32) -> io::Result<()> {
    // SAFETY: gettid takes no arguments and only returns the caller's id.
    let raw_tid = unsafe { libc::syscall(libc::SYS_gettid) };
    let tid = libc::id_t::try_from(raw_tid)
        .map_err(|_| io::Error::other(format!("thread id {raw_tid} out of range")))?;

    // SAFETY: setpriority takes plain integer arguments and touches no Rust
    // memory; PRIO_PROCESS with a tid targets only that thread on Linux.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_nice(_nice: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "per-thread priorities require Linux",
    ))
}

/// Apply `nice` to the calling thread. Failure is logged and ignored.
pub fn apply_thread_priority(role: &str, nice: i32) -> bool {
    match set_current_thread_nice(nice) {
        Ok(()) => {
            debug!(role, nice, "thread priority applied");
            true
        }
        Err(e) => {
            warn!(role, nice, error = %e, "failed to apply thread priority");
            false
        }
    }
}

/// Spawn a named OS thread that applies `nice` before running `f`.
pub fn spawn_named<F, T>(name: &str, nice: i32, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let role = name.to_string();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            apply_thread_priority(&role, nice);
            f()
        })
        .with_context(|| format!("spawning {name} thread"))
}

/// Spawn a named thread that drives `fut` on its own current-thread runtime.
pub fn spawn_runtime_thread<F>(name: &str, nice: i32, fut: F) -> Result<JoinHandle<Result<()>>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let role = name.to_string();
    spawn_named(name, nice, move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .with_context(|| format!("building {role} runtime"))?;
        runtime.block_on(fut);
        Ok(())
    })
}

/// Join a pipeline thread, turning a panic into an error.
pub fn join_thread<T>(name: &str, handle: JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("{name} thread panicked"))
}
