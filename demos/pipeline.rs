use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Two coroutines sharing a queue: a producer that yields after every item
/// and a consumer that yields whenever it finds the queue empty.
fn main() {
    let rt = coro::rt::Runtime::new();

    rt.run(|| {
        let queue: Rc<RefCell<VecDeque<u32>>> = Default::default();

        let q = Rc::clone(&queue);
        let producer = coro::spawn("producer", move || {
            for item in 0..8 {
                q.borrow_mut().push_back(item);
                println!("produced {item}");
                coro::yield_now();
            }
        });

        let q = Rc::clone(&queue);
        let consumer = coro::spawn("consumer", move || {
            for _ in 0..8 {
                while q.borrow().is_empty() {
                    coro::yield_now();
                }
                let item = q.borrow_mut().pop_front().unwrap();
                println!("consumed {item}");
            }
        });

        producer.join();
        consumer.join();
    });
}
