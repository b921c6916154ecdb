//! Commit-and-close-exactly-once on any exit path
//!
//! A scan can be interrupted at any point; whatever happens, the store's
//! pending writes must be committed exactly once. The signal handler itself
//! does nothing but raise a flag: flushing sled (or even taking a lock)
//! from signal context on a single-threaded process can re-enter a lock the
//! interrupted code already holds and deadlock. The scan loop polls the flag
//! at its per-unit checkpoint and unwinds normally; the [`Once`]-guarded
//! flush then runs on the ordinary exit path (normal return or the drop
//! guard). A hard kill (SIGKILL) can still lose the last uncommitted batch;
//! that is a documented limitation, not a bug.

use anyhow::{Context, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Once, OnceLock};

use crate::store::StatsStore;

static STORE: OnceLock<StatsStore> = OnceLock::new();
static FLUSH: Once = Once::new();
static INTERRUPT: AtomicBool = AtomicBool::new(false);
static SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Guard returned by [`install`]; dropping it runs the shutdown action, so
/// an early `?` return in main still commits.
pub struct ShutdownGuard;

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        run();
    }
}

/// Register the store and install SIGINT/SIGTERM handlers.
pub fn install(store: StatsStore) -> Result<ShutdownGuard> {
    let _ = STORE.set(store);

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).context("Failed to install SIGINT handler")?;
        signal::sigaction(Signal::SIGTERM, &action)
            .context("Failed to install SIGTERM handler")?;
    }
    Ok(ShutdownGuard)
}

/// The flag the signal handler raises; the scan loop polls it so a run can
/// unwind and commit instead of dying mid-write.
pub fn interrupt_flag() -> &'static AtomicBool {
    &INTERRUPT
}

pub fn interrupted() -> bool {
    INTERRUPT.load(Ordering::Relaxed)
}

/// The signal that requested the interruption, if any. Used to exit with
/// the conventional 128+signo code after the store is committed.
pub fn interrupt_signal() -> Option<i32> {
    match SIGNAL.load(Ordering::Relaxed) {
        0 => None,
        signo => Some(signo),
    }
}

/// Flush the registered store. Safe to call from every exit path; only the
/// first call does work. Never called from signal context.
pub fn run() {
    FLUSH.call_once(|| {
        if let Some(store) = STORE.get() {
            if let Err(e) = store.flush() {
                eprintln!("instats: failed to flush statistics store on shutdown: {e}");
            }
        }
    });
}

/// Async-signal-safe: two relaxed atomic stores, nothing else.
extern "C" fn handle_signal(signo: libc::c_int) {
    SIGNAL.store(signo, Ordering::Relaxed);
    INTERRUPT.store(true, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_without_registration_is_harmless() {
        run();
        run();
    }

    #[test]
    fn test_handler_only_raises_the_flag() {
        // The handler must stay callable from signal context: no locks, no
        // allocation, no I/O. Calling it directly is therefore safe, and
        // must leave nothing but the flag and signal number behind.
        handle_signal(libc::SIGINT);
        assert!(interrupted());
        assert!(interrupt_flag().load(Ordering::Relaxed));
        assert_eq!(interrupt_signal(), Some(libc::SIGINT));
    }
}
