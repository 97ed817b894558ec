use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::process;

use crate::rt::context::{Context, context_switch};
use crate::rt::coro::{CoroId, Coroutine, STACK_SIZE, State};
use crate::rt::stack::CoroStack;

/// Single-threaded cooperative `Coroutine` scheduler.
///
/// Owns every live coroutine record and the process-wide notion of which
/// coroutine is currently executing. Scheduling decisions happen only
/// inside explicit yield and wait calls; between them, exactly one
/// coroutine owns the CPU and every other context is frozen in its saved
/// register snapshot.
#[derive(Debug)]
pub(crate) struct Scheduler {
    /// Index-stable arena of coroutine records. Records are boxed so their
    /// addresses survive arena growth; a suspended context holds no
    /// pointers into the `Vec` itself. `RefCell` allows shared mutable
    /// access, but no borrow is ever held across a context switch.
    slots: RefCell<Vec<Option<Box<Coroutine>>>>,
    /// Reusable arena indices of reaped records.
    free: RefCell<Vec<usize>>,
    /// Insertion-ordered ring of live coroutine ids. Selection scans it
    /// circularly starting just after the current coroutine, which is what
    /// gives the round-robin interleaving its ordering guarantee. A
    /// record is removed from the ring before its slot is ever freed.
    ring: RefCell<Vec<CoroId>>,
    /// The coroutine whose registers currently hold live state.
    current: Cell<CoroId>,
}

impl Scheduler {
    /// Creates an empty `Scheduler`. No coroutine exists until
    /// [`enter_main`](Scheduler::enter_main) installs the main record.
    #[inline]
    pub(crate) fn new() -> Self {
        Scheduler {
            slots: Default::default(),
            free: Default::default(),
            ring: RefCell::new(Default::default()),
            current: Cell::new(CoroId(0)),
        }
    }

    /// Installs the record representing the thread's initial flow of
    /// control, discarding anything left over from a previous run. Must be
    /// called before any user code spawns or yields.
    pub(crate) fn enter_main(&self) {
        let mut slots = self.slots.borrow_mut();
        slots.clear();
        slots.push(Some(Box::new(Coroutine::main())));

        self.free.borrow_mut().clear();

        let mut ring = self.ring.borrow_mut();
        ring.clear();
        ring.push(CoroId(0));

        self.current.set(CoroId(0));
    }

    /// Drops every remaining coroutine record, joined or not. Values still
    /// live on an unfinished coroutine's stack are discarded without their
    /// destructors running; only the stack mapping itself is released.
    pub(crate) fn shutdown(&self) {
        self.ring.borrow_mut().clear();
        self.free.borrow_mut().clear();
        self.slots.borrow_mut().clear();
    }

    /// Registers a new coroutine in state `New` at the tail of the ring and
    /// returns its id. Never runs `entry` synchronously; stack and context
    /// stay unbound until the coroutine is first selected.
    pub(crate) fn spawn(&self, name: String, entry: Box<dyn FnOnce()>) -> CoroId {
        let record = Box::new(Coroutine::new(name, entry));

        let mut slots = self.slots.borrow_mut();
        let id = match self.free.borrow_mut().pop() {
            Some(index) => {
                slots[index] = Some(record);
                CoroId(index)
            }
            None => {
                slots.push(Some(record));
                CoroId(slots.len() - 1)
            }
        };

        self.ring.borrow_mut().push(id);
        id
    }

    /// Suspends the current coroutine and runs the next runnable one.
    ///
    /// Returns once the caller is re-selected in a later scheduling round,
    /// resuming at the exact program point of the call. A no-op when the
    /// caller is the only runnable coroutine. When *nothing* is runnable,
    /// all work is done (or every remaining coroutine waits on another):
    /// the process terminates normally.
    pub(crate) fn yield_now(&self) {
        let current = self.current.get();

        match self.select_after(current) {
            Some(next) if next == current => {}
            Some(next) => self.dispatch(next),
            None => process::exit(0),
        }
    }

    /// Cooperatively blocks the current coroutine until `target` completes,
    /// then reaps it.
    pub(crate) fn wait(&self, target: CoroId) {
        let current = self.current.get();
        debug_assert_ne!(current, target, "coroutine cannot wait on itself");

        if self.with(target, |c| c.state()) != State::Dead {
            self.with(target, |c| c.set_waiter(current));
            self.with(current, |c| c.set_state(State::Waiting));

            // Not runnable again until the target's completion flips the
            // state back to `Running`.
            self.yield_now();
        }

        self.reap(target);
    }

    /// Finishes the current coroutine after its body returned: marks it
    /// `Dead`, wakes its waiter if one is recorded, and immediately runs
    /// another selection round. There is no frame to return into on this
    /// stack, so this never returns.
    pub(crate) fn finish_current(&self) -> ! {
        let current = self.current.get();

        let waiter = self.with(current, |c| {
            c.set_state(State::Dead);
            c.waiter()
        });

        if let Some(waiter) = waiter {
            self.with(waiter, |c| c.set_state(State::Running));
        }

        match self.select_after(current) {
            Some(next) => {
                self.dispatch(next);
                unreachable!("completed coroutine must never be re-selected");
            }
            None => process::exit(0),
        }
    }

    /// Scans the ring circularly, starting just after `from`, for the first
    /// coroutine in a runnable state (`New` or `Running`). The scan wraps
    /// all the way around to `from` itself, so a lone runnable yielder
    /// selects itself.
    fn select_after(&self, from: CoroId) -> Option<CoroId> {
        let ring = self.ring.borrow();
        let slots = self.slots.borrow();

        let start = ring
            .iter()
            .position(|&id| id == from)
            .expect("current coroutine must be on the ring");

        (1..=ring.len())
            .map(|offset| ring[(start + offset) % ring.len()])
            .find(|&id| {
                slots[id.0]
                    .as_deref()
                    .expect("ring must only hold live records")
                    .is_runnable()
            })
    }

    /// Transfers control to `next`, binding a fresh stack and entry context
    /// first if it has never run.
    fn dispatch(&self, next: CoroId) {
        if self.with(next, |c| c.state()) == State::New {
            // Deferred initialization: the stack only exists once the
            // coroutine is actually selected.
            let stack = match CoroStack::new(STACK_SIZE) {
                Ok(stack) => stack,
                // Fatal by design; there is no recovery path for
                // exhaustion.
                Err(err) => panic!("{err}"),
            };

            let context = Context::with_entry(coroutine_trampoline, stack.top());

            self.with(next, |c| {
                c.bind(stack, context);
                c.set_state(State::Running);
            });
        }

        self.switch_to(next);
    }

    /// The context switch itself. Saves into the outgoing record, restores
    /// from the incoming one. Returns when (and only when) some later round
    /// selects the outgoing coroutine again.
    fn switch_to(&self, next: CoroId) {
        let previous = self.current.replace(next);

        // Raw pointers are taken under a short borrow and the borrow is
        // dropped before the switch: the resumed coroutine will re-enter
        // the scheduler and needs the `RefCell`s unborrowed.
        let (old, new) = {
            let slots = self.slots.borrow();
            let record = |id: CoroId| {
                slots[id.0]
                    .as_deref()
                    .expect("scheduled coroutine must be live")
                    .context_ptr()
            };
            (record(previous), record(next))
        };

        // SAFETY: Both records are live and boxed, so the pointers are
        // valid and stable. `next`'s context was either saved by a previous
        // switch or built over its freshly mapped stack, and `previous`
        // is the executing coroutine, so nothing else touches its context.
        unsafe { context_switch(old, new) };
    }

    /// Removes a completed coroutine from the ring and releases its record,
    /// context, and stack. The ring entry goes first so the ring never
    /// holds a freed record.
    fn reap(&self, id: CoroId) {
        debug_assert_eq!(self.with(id, |c| c.state()), State::Dead);

        self.ring.borrow_mut().retain(|&entry| entry != id);
        self.slots.borrow_mut()[id.0] = None;
        self.free.borrow_mut().push(id.0);
    }

    /// Shared access to a live coroutine record.
    fn with<R>(&self, id: CoroId, f: impl FnOnce(&Coroutine) -> R) -> R {
        let slots = self.slots.borrow();
        f(slots[id.0]
            .as_deref()
            .expect("coroutine record must be live"))
    }

    pub(crate) fn current_id(&self) -> CoroId {
        self.current.get()
    }
}

/// First frame of every coroutine: runs at the top of the fresh stack when
/// the scheduler dispatches a `New` coroutine, calls the body once, and
/// finishes the coroutine. Never returns; there is nothing beneath it.
extern "C" fn coroutine_trampoline() -> ! {
    let entry = crate::rt::with_current(|rt| {
        let scheduler = rt.scheduler();
        scheduler.with(scheduler.current_id(), |c| c.take_entry())
    });

    if let Some(entry) = entry {
        // A panic must not unwind past this frame: there is no caller
        // below it, only hand-built stack contents. The coroutine is
        // treated as having completed; the body reports failures through
        // its own shared state, never across the coroutine boundary.
        let _ = panic::catch_unwind(AssertUnwindSafe(entry));
    }

    crate::rt::with_current(|rt| rt.scheduler().finish_current())
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::rt::{Runtime, spawn, yield_now};

    type Log = Rc<RefCell<Vec<String>>>;

    fn log(log: &Log, entry: &str) {
        log.borrow_mut().push(entry.to_string());
    }

    #[test]
    fn test_round_robin_interleaving() {
        let rt = Runtime::new();
        let trace: Log = Default::default();

        rt.run(|| {
            let body = |tag: &'static str, trace: Log| {
                move || {
                    for _ in 0..3 {
                        log(&trace, tag);
                        yield_now();
                    }
                    log(&trace, &format!("done-{tag}"));
                }
            };

            let a = spawn("A", body("A", Rc::clone(&trace)));
            let b = spawn("B", body("B", Rc::clone(&trace)));

            a.join();
            b.join();
        });

        // Both yield at the same rate, so the interleaving follows creation
        // order exactly.
        assert_eq!(
            *trace.borrow(),
            ["A", "B", "A", "B", "A", "B", "done-A", "done-B"]
        );
    }

    #[test]
    fn test_join_observes_result() {
        let rt = Runtime::new();
        let result = Rc::new(Cell::new(0));

        rt.run(|| {
            let out = Rc::clone(&result);
            let worker = spawn("worker", move || out.set(6 * 7));

            worker.join();
            assert_eq!(result.get(), 42);
        });

        assert_eq!(result.get(), 42);
    }

    #[test]
    fn test_yield_preserves_state_across_suspensions() {
        let rt = Runtime::new();
        let counter = Rc::new(Cell::new(0u32));

        const YIELDS: u32 = 10;

        rt.run(|| {
            let shared = Rc::clone(&counter);
            let worker = spawn("counter", move || {
                // A local accumulated across suspension points must match
                // the shared count exactly: no lost or duplicated slices of
                // execution between yields.
                let mut local = 0;
                for _ in 0..YIELDS {
                    local += 1;
                    shared.set(shared.get() + 1);
                    yield_now();
                }
                assert_eq!(local, YIELDS);
            });

            worker.join();
        });

        assert_eq!(counter.get(), YIELDS);
    }

    #[test]
    fn test_non_yielding_coroutine_runs_uninterrupted() {
        let rt = Runtime::new();
        let trace: Log = Default::default();

        rt.run(|| {
            let t = Rc::clone(&trace);
            let greedy = spawn("greedy", move || {
                for i in 0..5 {
                    log(&t, &format!("greedy-{i}"));
                }
            });

            let t = Rc::clone(&trace);
            let polite = spawn("polite", move || log(&t, "polite"));

            greedy.join();
            polite.join();
        });

        // Strictly cooperative: nothing else progresses while the greedy
        // coroutine holds the CPU.
        assert_eq!(
            *trace.borrow(),
            [
                "greedy-0", "greedy-1", "greedy-2", "greedy-3", "greedy-4", "polite"
            ]
        );
    }

    #[test]
    fn test_hundred_one_yield_coroutines() {
        let rt = Runtime::new();
        let finished = Rc::new(Cell::new(0u32));

        rt.run(|| {
            let handles: Vec<_> = (0..100)
                .map(|i| {
                    let count = Rc::clone(&finished);
                    spawn(format!("worker-{i}"), move || {
                        yield_now();
                        count.set(count.get() + 1);
                    })
                })
                .collect();

            // Joining in creation order must succeed for every handle.
            for handle in handles {
                handle.join();
            }
        });

        assert_eq!(finished.get(), 100);
    }

    #[test]
    fn test_join_already_completed_coroutine() {
        let rt = Runtime::new();

        rt.run(|| {
            let done = Rc::new(Cell::new(false));

            let flag = Rc::clone(&done);
            let first = spawn("first", move || flag.set(true));
            let second = spawn("second", || {});

            // Joining `second` drives the ring past `first` as well, so by
            // the time `first` is joined it is already dead and the join
            // returns immediately.
            second.join();
            assert!(done.get());
            first.join();
        });
    }

    #[test]
    fn test_wait_tree_completes() {
        let rt = Runtime::new();
        let trace: Log = Default::default();

        rt.run(|| {
            let t = Rc::clone(&trace);
            let outer = spawn("outer", move || {
                let inner_t = Rc::clone(&t);
                let inner = spawn("inner", move || log(&inner_t, "inner"));

                inner.join();
                log(&t, "outer");
            });

            outer.join();
        });

        assert_eq!(*trace.borrow(), ["inner", "outer"]);
    }

    #[test]
    fn test_yield_without_peers_is_noop() {
        let rt = Runtime::new();

        rt.run(|| {
            yield_now();
            yield_now();
        });
    }

    #[test]
    fn test_panicking_coroutine_counts_as_completed() {
        let rt = Runtime::new();
        let after = Rc::new(Cell::new(false));

        rt.run(|| {
            let handle = spawn("doomed", || panic!("reported via side channels only"));

            handle.join();
            after.set(true);
        });

        assert!(after.get());
    }

    #[test]
    fn test_runtime_is_reusable() {
        let rt = Runtime::new();

        for round in 0..2 {
            let result = Rc::new(Cell::new(0));

            let out = Rc::clone(&result);
            rt.run(move || {
                let worker = spawn("worker", move || out.set(round + 1));
                worker.join();
            });

            assert_eq!(result.get(), round + 1);
        }
    }

    #[test]
    fn test_detached_coroutines_reclaimed_at_teardown() {
        let rt = Runtime::new();
        let progressed = Rc::new(Cell::new(0u32));

        rt.run(|| {
            let count = Rc::clone(&progressed);
            let _ = spawn("detached", move || {
                count.set(count.get() + 1);
                yield_now();
                // Never reached: main returns while this coroutine is
                // suspended, and teardown discards it.
                count.set(count.get() + 100);
            });

            yield_now();
        });

        assert_eq!(progressed.get(), 1);
    }

    #[test]
    #[should_panic(expected = "outside of a runtime context")]
    fn test_spawn_outside_runtime_panics() {
        let _ = spawn("stray", || {});
    }
}
