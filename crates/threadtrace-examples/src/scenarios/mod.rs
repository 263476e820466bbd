pub mod board_roundtrip;
pub mod lock_order;
pub mod parked_workers;
pub mod quit_after;
pub mod tokio_workers;

/// Print every thread's stack, mapping the error to the binary's error type.
pub(crate) fn print_trace() -> Result<(), String> {
    threadtrace::print_current_trace().map_err(|e| e.to_string())
}
