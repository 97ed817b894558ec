fn main() {
    let rt = coro::rt::Runtime::new();

    rt.run(|| {
        println!("running main coroutine");
        let res = 1 + 2;

        let a = coro::spawn("printer-1", move || {
            println!("printing result in coroutine 1: {res}");
        });

        let b = coro::spawn("printer-2", move || {
            println!("printing result in coroutine 2: {res}");
        });

        let c = coro::spawn("printer-3", move || {
            println!("printing result in coroutine 3: {res}");
        });

        a.join();
        b.join();
        c.join();
    })
}
