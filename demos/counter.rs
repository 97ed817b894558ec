fn counter(id: usize, rounds: u32) {
    for i in 0..rounds {
        println!("coroutine {id}: {i}");
        // Yield control to the runtime to allow other coroutines to run.
        coro::yield_now();
    }
}

fn main() {
    let rt = coro::rt::Runtime::new();

    rt.run(|| {
        let a = coro::spawn("counter-1", || counter(1, 10));
        let b = coro::spawn("counter-2", || counter(2, 10));
        let c = coro::spawn("counter-3", || counter(3, 10));

        a.join();
        b.join();
        c.join();
    });
}
