pub fn run() -> Result<(), String> {
    println!("capturing with quit_after; the process exits once the trace is printed");
    let result = threadtrace::capture_trace(true, true);

    // Only reachable if the exit guard failed to fire.
    Err(format!("process kept running after quit_after (result: {result:?})"))
}
