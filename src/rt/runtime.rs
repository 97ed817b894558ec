use std::rc::Rc;

use crate::rt::CURRENT_RUNTIME;
use crate::rt::scheduler::Scheduler;

/// The `coro` runtime.
#[derive(Debug, Clone)]
pub struct Runtime {
    /// The scheduler owning every coroutine record and the "currently
    /// running" pointer. Wrapped in an `Rc` so cloned `Runtime` handles
    /// share one arena.
    scheduler: Rc<Scheduler>,
}

/// Guard used to set the thread-local `Runtime` context during
/// initialization.
///
/// When dropped, the `Runtime` is cleared automatically.
struct EnterGuard;

impl EnterGuard {
    /// Initializes the thread-local `Runtime`, returning an `EnterGuard`.
    fn new(rt: &Runtime) -> Self {
        CURRENT_RUNTIME.with(|c| c.set(Some(rt)));
        EnterGuard
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_RUNTIME.with(|c| c.set(None));
    }
}

impl Runtime {
    /// Creates a new `Runtime` instance.
    #[inline]
    pub fn new() -> Self {
        Runtime {
            scheduler: Rc::new(Scheduler::new()),
        }
    }

    /// Runs `f` as the main coroutine, serving as the runtime's entry
    /// point, and returns its result.
    ///
    /// The thread's initial flow of control is itself a coroutine: its
    /// record is installed (already running, on the OS thread stack) before
    /// `f` executes, so yielding and joining from top-level code is always
    /// well-formed. Coroutines spawned by `f` that were never joined by the
    /// time it returns are reclaimed without running any further.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _enter = EnterGuard::new(self);

        self.scheduler.enter_main();
        let output = f();
        self.scheduler.shutdown();

        output
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
