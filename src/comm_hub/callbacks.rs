//! The single swallow point for user-supplied callbacks
//!
//! Subscribers, region watchers, and guna handlers run arbitrary caller code
//! inside kernel operations. The kernel's contract is log-and-continue: a
//! panicking callback is caught here, logged, and never propagates. No other
//! place in the kernel swallows a failure.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::warn;

/// Invokes a user callback, isolating panics from the calling operation
///
/// `context` names the callback site (for the log line only). Must be called
/// with every internal lock already released; the callback may re-enter the
/// hub.
pub(crate) fn invoke_user_callback<F: FnOnce()>(context: &str, callback: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let detail = panic_detail(panic.as_ref());
        warn!(context, detail, "user callback panicked; continuing");
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn panicking_callback_does_not_propagate() {
        invoke_user_callback("test", || panic!("boom"));
    }

    #[test]
    fn callbacks_after_a_panic_still_run() {
        let calls = AtomicUsize::new(0);
        invoke_user_callback("test", || panic!("first"));
        invoke_user_callback("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
