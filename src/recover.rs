//! Panic capture for steps.
//!
//! The stack has already unwound by the time `catch_unwind` returns, so the
//! backtrace and location are recorded by a panic hook while the panicking
//! frames are still live. The hook only records panics raised on a thread that
//! is currently polling a step, and always forwards to the previous hook.

use futures::future::poll_fn;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::future::Future;
use std::sync::Once;

use crate::error::TransactionError;

struct CapturedPanic {
    location: Option<String>,
    stack: Backtrace,
}

thread_local! {
    static CAPTURE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: Cell<Option<CapturedPanic>> = const { Cell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let capturing = CAPTURE_DEPTH.try_with(Cell::get).unwrap_or(0) > 0;
            if capturing {
                let captured = CapturedPanic {
                    location: info.location().map(ToString::to_string),
                    stack: Backtrace::force_capture(),
                };
                let _ = LAST_PANIC.try_with(|slot| slot.set(Some(captured)));
            }
            previous(info);
        }));
    });
}

struct CaptureGuard;

impl CaptureGuard {
    fn enter() -> Self {
        CAPTURE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        CaptureGuard
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = CAPTURE_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Polls `fut` with panic capture enabled on the polling thread.
pub(crate) async fn capture_panics<F: Future>(fut: F) -> F::Output {
    install_hook();
    let mut fut = std::pin::pin!(fut);
    poll_fn(|cx| {
        let _guard = CaptureGuard::enter();
        fut.as_mut().poll(cx)
    })
    .await
}

/// Converts a recovered panic payload into an error, attaching the stack
/// recorded at the panic site when there is one.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> TransactionError {
    let message = if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    };
    let (location, stack) = match LAST_PANIC.with(Cell::take) {
        Some(captured) => (captured.location, captured.stack),
        None => (None, Backtrace::force_capture()),
    };
    TransactionError::Panic {
        message,
        location,
        stack: stack.to_string(),
    }
}
