//! The `coro` runtime.
//!
//! One core feature of modern operating systems is `multitasking`, the
//! ability to interleave the execution of multiple tasks. The two main
//! forms are `preemptive` and `cooperative`.
//!
//! Preemptive multitasking is the approach used by operating systems to
//! control the execution of threads: the kernel decides when each thread
//! runs and for how long, interrupting it at arbitrary points. Because a
//! thread can be stopped anywhere, the kernel must save its full execution
//! state (CPU registers plus a separately allocated call stack) and restore
//! the state of the next thread — a `context switch`. The OS stays in full
//! control and can guarantee fairness, at the cost of per-thread kernel
//! bookkeeping and the inability of the program to reason about exactly
//! where interleaving happens.
//!
//! Cooperative multitasking instead gives the running task the
//! responsibility of yielding. This crate implements the *stackful* flavor:
//! each coroutine owns a real private call stack, and suspension is a
//! manual context switch that saves the callee-saved registers and stack
//! pointer, then restores another coroutine's. Unlike Rust's `async/await`
//! (which compiles suspension points into a state machine sharing one
//! stack), a stackful coroutine can yield from arbitrarily deep in an
//! ordinary call chain, and resumption lands at the exact yield point with
//! every local intact. The main drawback is shared with all cooperative
//! designs: a coroutine that never yields starves every other coroutine,
//! and nothing interrupts it.
//!
//! Because the OS is not involved, a `runtime` is required to keep the
//! ready ring of coroutines, pick the next runnable one in round-robin
//! order, and perform the switches. Scheduling here is strictly
//! single-threaded: concurrency is purely structural (many suspended
//! stacks), never simultaneous, so the scheduler needs no locks at all.

mod runtime;
pub use runtime::Runtime;

mod coro;
pub use coro::JoinHandle;

pub(crate) mod context;
pub(crate) mod scheduler;
pub(crate) mod stack;

thread_local! {
    /// Using thread-local storage (`TLS`) keeps independent runtimes on
    /// different threads (unit tests, most importantly) fully isolated,
    /// and gives explicit scoping of the current runtime context.
    pub(crate) static CURRENT_RUNTIME: std::cell::Cell<Option<*const Runtime>> = const {
        std::cell::Cell::new(None)
    };
}

/// Runs `f` against the runtime the current thread entered through
/// [`Runtime::run`].
///
/// # Panics
///
/// Panics when no runtime context is set on this thread.
pub(crate) fn with_current<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    CURRENT_RUNTIME.with(|rt| {
        if let Some(ptr) = rt.get() {
            // SAFETY: The thread-local holds a raw pointer to a `Runtime`.
            // This pointer is only set via the entry point `Runtime::run`,
            // and cleared when the associated `EnterGuard` is dropped, so
            // the referent is alive for the whole runtime context.
            let rt = unsafe { &*ptr };
            f(rt)
        } else {
            panic!("called outside of a runtime context");
        }
    })
}

/// Registers a new coroutine running `f` on the current runtime, returning
/// its [`JoinHandle`].
///
/// Never blocks and never runs `f` synchronously: the coroutine starts in
/// line at the tail of the ready ring, and its private stack is only
/// allocated once the scheduler first selects it. `name` is purely
/// diagnostic and need not be unique.
///
/// # Panics
///
/// Panics when called outside of a runtime context.
pub fn spawn(name: impl Into<String>, f: impl FnOnce() + 'static) -> JoinHandle {
    with_current(|rt| JoinHandle::new(rt.scheduler().spawn(name.into(), Box::new(f))))
}

/// Cooperatively yields the current coroutine.
///
/// The next runnable coroutine (in round-robin order) runs until control
/// eventually rotates back; the call then returns with all local state
/// intact, as if time had simply passed. Immediately returns when no other
/// coroutine is runnable.
///
/// # Panics
///
/// Panics when called outside of a runtime context.
pub fn yield_now() {
    with_current(|rt| rt.scheduler().yield_now());
}
