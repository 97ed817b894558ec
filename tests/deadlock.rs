//! Mutual-wait termination behavior.
//!
//! Two coroutines that join each other form a wait cycle: neither can ever
//! be woken, the scheduler skips both forever, and the program terminates
//! without executing either body's remaining code. That is the expected
//! (if unfortunate) outcome of a wait cycle, not a crash — cooperative
//! runtimes cannot tell this apart from legitimate completion.
//!
//! Note that the main coroutine itself can never be drawn into such a
//! cycle: joining a cycle member requires its handle, and both handles of
//! a two-cycle are already owned inside the cycle. Main therefore stays
//! runnable, finishes, and teardown reclaims the two blocked records.

use std::cell::Cell;
use std::rc::Rc;

type HandleSlot = Rc<Cell<Option<coro::JoinHandle>>>;

#[test]
fn test_mutual_wait_blocks_both_forever() {
    let rt = coro::rt::Runtime::new();

    let resumed = Rc::new(Cell::new(0u32));

    rt.run(|| {
        let slot: HandleSlot = Default::default();

        let handles = Rc::clone(&slot);
        let count = Rc::clone(&resumed);
        let a = coro::spawn("a", move || {
            // Wait for main to hand over `b`'s handle, then join it.
            let b = loop {
                match handles.take() {
                    Some(handle) => break handle,
                    None => coro::yield_now(),
                }
            };

            b.join();
            count.set(count.get() + 1);
        });

        let count = Rc::clone(&resumed);
        let b = coro::spawn("b", move || {
            a.join();
            count.set(count.get() + 1);
        });

        slot.set(Some(b));

        // Drive both coroutines into their joins. After two rounds `a`
        // waits on `b` and `b` waits on `a`; every further yield finds
        // neither runnable and returns straight back to main.
        for _ in 0..4 {
            coro::yield_now();
        }
    });

    // Neither body ran past its join; teardown reclaimed both records.
    assert_eq!(resumed.get(), 0);
}
