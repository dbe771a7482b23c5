//! Process-wide diagnostic hook for errors that cannot be returned to a caller.
//!
//! Panics isolated by a [`MessageDispatcher`](crate::MessageDispatcher), unknown effects,
//! and dispatches into disposed loops are all reported here. Without a custom handler
//! they are logged with [`tracing::error!`].

use std::sync::Arc;

use spin::Mutex;

use crate::Error;

type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

static ERROR_HANDLER: Mutex<Option<ErrorHandler>> = Mutex::new(None);

/// Report an error to the installed handler.
///
/// The handler is invoked outside of the internal lock, so it may itself
/// install a new handler.
pub fn handle_error(error: &Error) {
    let handler = ERROR_HANDLER.lock().clone();
    match handler {
        Some(handler) => handler(error),
        None => tracing::error!(error = %error, "uncaught error"),
    }
}

/// Install a custom error handler, replacing any previous one.
pub fn set_error_handler<H>(handler: H)
where
    H: Fn(&Error) + Send + Sync + 'static,
{
    *ERROR_HANDLER.lock() = Some(Arc::new(handler));
}

/// Restore the default handler, which logs through `tracing`.
pub fn reset_error_handler() {
    *ERROR_HANDLER.lock() = None;
}
