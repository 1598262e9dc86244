//! Process-exit fallback for instances the host forgot to stop.
//!
//! The registry is a single ordered list of entries accumulated while the
//! host runs and drained once from an `atexit(3)` handler. Instance entries
//! are [`Weak`] so registration never keeps an instance alive; an entry whose
//! instance is already gone resolves to nothing and is skipped. Cleanup
//! entries are handles to background teardowns that must finish before the
//! process terminates.

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, Once, PoisonError, Weak};

use tracing::{debug, warn};

use crate::supervisor::CleanupHandle;

const EXIT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::exit_hook");

/// Something the exit sequence can stop.
///
/// Implementations must be synchronous and must not panic across the
/// boundary; panics are caught and discarded regardless.
pub(crate) trait ExitStop: Send + Sync {
    /// Fast, blocking, non-failing stop.
    fn stop_at_exit(&self);
}

enum ExitEntry {
    Instance(Weak<dyn ExitStop>),
    Cleanup(CleanupHandle),
}

impl ExitEntry {
    fn is_live(&self) -> bool {
        match self {
            Self::Instance(target) => target.strong_count() > 0,
            Self::Cleanup(handle) => !handle.is_finished(),
        }
    }
}

/// Tally of one drain of the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitRun {
    pub stopped: usize,
    pub skipped: usize,
    pub joined: usize,
}

/// Ordered registry of exit-time callbacks.
pub(crate) struct ExitHooks {
    entries: Mutex<Vec<ExitEntry>>,
}

impl ExitHooks {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers a non-owning reference to `target`.
    pub(crate) fn register_instance(&self, target: Weak<dyn ExitStop>) {
        self.push(ExitEntry::Instance(target));
    }

    /// Registers a background teardown to join at exit.
    pub(crate) fn register_cleanup(&self, handle: CleanupHandle) {
        self.push(ExitEntry::Cleanup(handle));
    }

    /// Entries currently held.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn push(&self, entry: ExitEntry) {
        let mut entries = self.lock();
        // Dead instances and finished teardowns have nothing left to do; drop
        // them so the registry does not grow with every instance.
        entries.retain(ExitEntry::is_live);
        entries.push(entry);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ExitEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drains and runs every entry in registration order.
    ///
    /// Entries registered while draining (for example the teardown of an
    /// instance whose last handle the hook itself dropped) are run too.
    pub(crate) fn run(&self) -> ExitRun {
        let mut tally = ExitRun::default();
        loop {
            let batch = mem::take(&mut *self.lock());
            if batch.is_empty() {
                return tally;
            }
            for entry in batch {
                run_entry(entry, &mut tally);
            }
        }
    }
}

fn run_entry(entry: ExitEntry, tally: &mut ExitRun) {
    match entry {
        ExitEntry::Instance(target) => {
            let Some(instance) = target.upgrade() else {
                tally.skipped += 1;
                return;
            };
            if panic::catch_unwind(AssertUnwindSafe(|| instance.stop_at_exit())).is_err() {
                warn!(target: EXIT_TARGET, "exit-time stop panicked; ignoring");
            }
            tally.stopped += 1;
        }
        ExitEntry::Cleanup(handle) => {
            let report = handle.wait();
            debug!(
                target: EXIT_TARGET,
                pid = report.pid(),
                clean = report.is_clean(),
                "joined background teardown at exit"
            );
            tally.joined += 1;
        }
    }
}

static EXIT_HOOKS: ExitHooks = ExitHooks::new();
static INSTALL: Once = Once::new();

/// Registers `target` with the process-wide exit sequence.
pub(crate) fn register_instance(target: Weak<dyn ExitStop>) {
    install();
    EXIT_HOOKS.register_instance(target);
}

/// Registers a background teardown with the process-wide exit sequence.
pub(crate) fn register_cleanup(handle: CleanupHandle) {
    install();
    EXIT_HOOKS.register_cleanup(handle);
}

/// Stops every instance still alive and joins every pending teardown now.
///
/// This is what runs at normal process exit. Hosts that leave through a path
/// that skips `atexit(3)` handlers (such as `std::process::abort` or `_exit`)
/// can call it beforehand. Calling it more than once is harmless.
pub fn run_exit_hooks() {
    let run = EXIT_HOOKS.run();
    if run != ExitRun::default() {
        debug!(
            target: EXIT_TARGET,
            stopped = run.stopped,
            skipped = run.skipped,
            joined = run.joined,
            "exit hooks ran"
        );
    }
}

fn install() {
    INSTALL.call_once(|| {
        // SAFETY: `run_at_exit` is a plain `extern "C" fn()` that never
        // unwinds; registration has no other preconditions.
        let result = unsafe { libc::atexit(run_at_exit) };
        if result != 0 {
            warn!(
                target: EXIT_TARGET,
                "failed to register exit handler; instances must be stopped explicitly"
            );
        }
    });
}

extern "C" fn run_at_exit() {
    // Unwinding out of an `extern "C"` function aborts the process.
    let _ = panic::catch_unwind(run_exit_hooks);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        stops: AtomicUsize,
    }

    impl ExitStop for Recorder {
        fn stop_at_exit(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl ExitStop for Panicker {
        fn stop_at_exit(&self) {
            panic!("boom");
        }
    }

    fn weak_of<T: ExitStop + 'static>(target: &Arc<T>) -> Weak<dyn ExitStop> {
        let weak: Weak<T> = Arc::downgrade(target);
        weak
    }

    #[test]
    fn live_instances_are_stopped_once() {
        let hooks = ExitHooks::new();
        let recorder = Arc::new(Recorder::default());
        hooks.register_instance(weak_of(&recorder));
        let run = hooks.run();
        assert_eq!(run.stopped, 1);
        assert_eq!(recorder.stops.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.run(), ExitRun::default(), "registry drains once");
    }

    #[test]
    fn registration_does_not_keep_instances_alive() {
        let hooks = ExitHooks::new();
        let recorder = Arc::new(Recorder::default());
        hooks.register_instance(weak_of(&recorder));
        assert_eq!(Arc::strong_count(&recorder), 1);
        drop(recorder);
        let run = hooks.run();
        assert_eq!(run.stopped, 0);
        assert_eq!(run.skipped, 1);
    }

    #[test]
    fn dead_entries_are_pruned_on_registration() {
        let hooks = ExitHooks::new();
        for _ in 0..4 {
            let transient = Arc::new(Recorder::default());
            hooks.register_instance(weak_of(&transient));
        }
        let survivor = Arc::new(Recorder::default());
        hooks.register_instance(weak_of(&survivor));
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn panicking_stop_is_swallowed() {
        let hooks = ExitHooks::new();
        let panicker = Arc::new(Panicker);
        let recorder = Arc::new(Recorder::default());
        hooks.register_instance(weak_of(&panicker));
        hooks.register_instance(weak_of(&recorder));
        let run = hooks.run();
        assert_eq!(run.stopped, 2);
        assert_eq!(recorder.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_teardowns_are_joined() {
        let hooks = ExitHooks::new();
        let handle = CleanupHandle::pending();
        hooks.register_cleanup(handle.clone());
        let finisher = handle.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            finisher.complete(crate::supervisor::CleanupReport::empty(7));
        });
        let run = hooks.run();
        worker.join().expect("worker thread");
        assert_eq!(run.joined, 1);
        assert!(handle.is_finished());
    }
}
