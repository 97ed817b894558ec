//! Coroutine records and the caller-facing join handle.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;

use crate::rt::context::Context;
use crate::rt::stack::CoroStack;

/// Size of each coroutine's private stack.
pub(crate) const STACK_SIZE: usize = 64 * 1024;

/// Index of a coroutine record in the scheduler's arena. The runtime's
/// non-owning reference to a coroutine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct CoroId(pub(crate) usize);

/// Lifecycle state of a coroutine.
///
/// `Running` covers both "currently executing" and "suspended at a yield
/// point": either way the coroutine is runnable. `Waiting` coroutines are
/// skipped by the scheduler until the coroutine they joined on completes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum State {
    New,
    Running,
    Waiting,
    Dead,
}

/// A user-scheduled unit of execution with its own private stack, similar
/// to an OS thread, but switched only at explicit yield points by the
/// [runtime] rather than preemptively by the kernel.
///
/// [runtime]: crate::rt
pub(crate) struct Coroutine {
    /// Diagnostic name; not required to be unique.
    name: String,
    /// Deferred body. Present only while `New`; the trampoline takes it on
    /// first dispatch.
    entry: RefCell<Option<Box<dyn FnOnce()>>>,
    state: Cell<State>,
    /// The single coroutine blocked on this one's completion, if any.
    waiter: Cell<Option<CoroId>>,
    /// Saved register snapshot. Written through a raw pointer by the
    /// context switch itself, hence the `UnsafeCell`. Meaningful only once
    /// the coroutine has been switched away from at least once.
    context: UnsafeCell<Context>,
    /// Private stack. `None` until first dispatch (the main coroutine runs
    /// on the OS thread stack and never binds one).
    stack: RefCell<Option<CoroStack>>,
}

impl Coroutine {
    /// Creates a record in state `New` with no stack or context bound;
    /// both are deferred to first dispatch.
    pub(crate) fn new(name: String, entry: Box<dyn FnOnce()>) -> Self {
        Coroutine {
            name,
            entry: RefCell::new(Some(entry)),
            state: Cell::new(State::New),
            waiter: Cell::new(None),
            context: UnsafeCell::new(Context::default()),
            stack: RefCell::new(None),
        }
    }

    /// Creates the record for the thread's initial flow of control: already
    /// `Running`, with no entry and no private stack (it runs on the OS
    /// thread stack).
    pub(crate) fn main() -> Self {
        Coroutine {
            name: String::from("main"),
            entry: RefCell::new(None),
            state: Cell::new(State::Running),
            waiter: Cell::new(None),
            context: UnsafeCell::new(Context::default()),
            stack: RefCell::new(None),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.set(state);
    }

    /// Whether the scheduler may select this coroutine.
    pub(crate) fn is_runnable(&self) -> bool {
        matches!(self.state.get(), State::New | State::Running)
    }

    pub(crate) fn waiter(&self) -> Option<CoroId> {
        self.waiter.get()
    }

    pub(crate) fn set_waiter(&self, waiter: CoroId) {
        debug_assert!(
            self.waiter.get().is_none(),
            "coroutine `{}` already has a waiter",
            self.name
        );
        self.waiter.set(Some(waiter));
    }

    /// Takes the deferred body for its one and only run.
    pub(crate) fn take_entry(&self) -> Option<Box<dyn FnOnce()>> {
        self.entry.borrow_mut().take()
    }

    /// Binds the freshly allocated stack and the context that enters it.
    pub(crate) fn bind(&self, stack: CoroStack, context: Context) {
        *self.stack.borrow_mut() = Some(stack);
        // SAFETY: The coroutine is not executing (it is `New`, being
        // dispatched for the first time), so nothing else references its
        // context.
        unsafe {
            *self.context.get() = context;
        }
    }

    /// Raw pointer for the context switch. Only dereferenced by
    /// [`context_switch`](crate::rt::context::context_switch) while the
    /// scheduler holds no borrow of this record.
    pub(crate) fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("waiter", &self.waiter)
            .finish()
    }
}

/// Owned handle to a spawned coroutine, returned by [`spawn`](crate::spawn).
///
/// Consumed by [`join`](JoinHandle::join). Since the handle is neither
/// `Copy` nor `Clone`, at most one coroutine can ever wait on a given
/// target; the single-waiter slot in the record cannot be contended.
#[must_use = "a coroutine is only reclaimed once its handle is joined"]
#[derive(Debug)]
pub struct JoinHandle {
    pub(crate) id: CoroId,
    /// Handles are tied to the runtime of the thread that spawned them.
    _marker: PhantomData<*const ()>,
}

impl JoinHandle {
    pub(crate) fn new(id: CoroId) -> Self {
        JoinHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// Cooperatively blocks until the target coroutine completes, then
    /// reclaims its stack and record.
    ///
    /// Returns immediately if the target has already completed. Otherwise
    /// the caller is marked waiting, other coroutines run, and the call
    /// returns once the target's body has returned.
    ///
    /// Dropping a handle without joining detaches the coroutine: it keeps
    /// getting scheduled, but its record is only reclaimed when the runtime
    /// tears down.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a runtime context.
    pub fn join(self) {
        crate::rt::with_current(|rt| rt.scheduler().wait(self.id));
    }
}
