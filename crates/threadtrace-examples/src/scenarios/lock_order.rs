use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

fn spawn_lock_order_worker(
    thread_name: &'static str,
    first_name: &'static str,
    first: Arc<Mutex<()>>,
    second_name: &'static str,
    second: Arc<Mutex<()>>,
    ready_barrier: Arc<Barrier>,
) -> Result<(), String> {
    thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let _first_guard = first.lock();
            println!("{thread_name} locked {first_name}; waiting for peer");

            ready_barrier.wait();

            println!(
                "{thread_name} attempting {second_name}; this should deadlock due to lock-order inversion"
            );
            let _second_guard = second.lock();

            println!("{thread_name} unexpectedly acquired {second_name}; deadlock did not occur");
        })
        .map(drop)
        .map_err(|e| format!("failed to spawn {thread_name}: {e}"))
}

pub fn run() -> Result<(), String> {
    let left = Arc::new(Mutex::new(()));
    let right = Arc::new(Mutex::new(()));
    let ready_barrier = Arc::new(Barrier::new(2));

    spawn_lock_order_worker(
        "deadlock.alpha",
        "demo.shared.left",
        Arc::clone(&left),
        "demo.shared.right",
        Arc::clone(&right),
        Arc::clone(&ready_barrier),
    )?;
    spawn_lock_order_worker(
        "deadlock.beta",
        "demo.shared.right",
        Arc::clone(&right),
        "demo.shared.left",
        Arc::clone(&left),
        Arc::clone(&ready_barrier),
    )?;

    // Give both workers time to block on their second lock.
    thread::sleep(Duration::from_millis(200));
    println!("dumping stacks; both deadlock.* threads should sit in Mutex::lock");
    super::print_trace()?;

    // The workers never finish, so leave without joining them.
    std::process::exit(0);
}
