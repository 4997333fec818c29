//! Stack traces for failures reported back to the caller.
//!
//! Handler errors carry the backtrace anyhow captured, or one taken at the
//! dispatch site when capture was disabled. Panics are traced from inside a
//! panic hook, which still sees the panicking frames.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    /// Set while this thread runs a handler under [`catch_panic`].
    static CAPTURING: Cell<bool> = const { Cell::new(false) };

    /// Location and trace recorded by the hook for the last captured panic.
    static LAST_PANIC: RefCell<Option<(String, Backtrace)>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// A panic caught inside a handler.
#[derive(Debug)]
pub(crate) struct PanicReport {
    pub message: String,
    pub location: String,
    pub trace: String,
}

/// Render a handler error with its cause chain and a stack trace.
pub(crate) fn render_error(err: &anyhow::Error) -> String {
    if err.backtrace().status() == BacktraceStatus::Captured {
        // anyhow's Debug output already ends with the captured trace.
        format!("{:?}", err)
    } else {
        format!("{:?}\n\nStack backtrace:\n{}", err, Backtrace::force_capture())
    }
}

/// Run `f`, turning a panic into a [`PanicReport`].
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, PanicReport> {
    install_hook();

    let outer = CAPTURING.with(|c| c.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(outer));

    outcome.map_err(|payload| {
        let (location, trace) = LAST_PANIC
            .with(|p| p.borrow_mut().take())
            .unwrap_or_else(|| ("<unknown>".to_string(), Backtrace::force_capture()));
        PanicReport {
            message: panic_message(payload.as_ref()),
            location,
            trace: trace.to_string(),
        }
    })
}

/// Chain a hook in front of the existing one.
///
/// Panics on capturing threads are recorded and not printed; the dispatch
/// loop logs them. Every other panic goes to the previous hook.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let location = info
                    .location()
                    .map_or_else(|| "<unknown>".to_string(), |l| l.to_string());
                LAST_PANIC.with(|p| *p.borrow_mut() = Some((location, Backtrace::force_capture())));
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
