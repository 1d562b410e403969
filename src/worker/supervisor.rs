use crate::foundation::error::{ExportError, ExportResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Spawn a named thread whose panics are converted into [`ExportError::WorkerPanicked`] and
/// handed to `report` instead of unwinding silently.
pub(crate) fn spawn_supervised<F, R>(name: &str, body: F, report: R) -> ExportResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
    R: FnOnce(ExportError) + Send + 'static,
{
    let worker = name.to_owned();
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                let message = panic_message(payload.as_ref());
                tracing::error!(worker = %worker, %message, "worker panicked");
                report(ExportError::WorkerPanicked { worker, message });
            }
        })
        .map_err(|e| {
            ExportError::Other(anyhow::anyhow!("failed to spawn {name} thread: {e}"))
        })
}
