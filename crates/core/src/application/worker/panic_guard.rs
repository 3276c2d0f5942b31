// Panic isolation for processor invocations
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked
    Panicked(String),
    /// Execution exceeded its deadline and was aborted
    TimedOut(Duration),
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Aborts the task when dropped (the caller was cancelled or timed out)
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a future on its own task with a deadline
///
/// A panic inside the future is caught at the task boundary and returned as
/// `Panicked`; it never unwinds into the caller. If the caller is dropped, the
/// task is aborted with it.
pub async fn execute_guarded<F, T>(future: F, deadline: Duration) -> PanicGuardResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut guard = AbortOnDrop(tokio::task::spawn(future));

    match tokio::time::timeout(deadline, &mut guard.0).await {
        Ok(Ok(value)) => PanicGuardResult::Success(value),
        Ok(Err(join_err)) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic().as_ref());
            error!(panic_msg = %panic_msg, "Guarded task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
        Ok(Err(join_err)) => PanicGuardResult::Panicked(format!("task cancelled: {}", join_err)),
        Err(_) => PanicGuardResult::TimedOut(deadline),
    }
}
