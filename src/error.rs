//! Error types for loops, connections, effect routing and the lifecycle controller.

use std::any::Any;

/// Errors returned by [`Loop`](crate::Loop) operations.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The loop has been disposed; events and observers are no longer accepted.
    #[error("this loop has already been disposed")]
    Disposed,

    /// Connecting the effect handler failed while starting the loop.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Errors raised by [`Connectable`](crate::Connectable)s and the connections they produce.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// `connect` was called more times than the connectable supports.
    #[error("connection limit exceeded")]
    LimitExceeded,

    /// No handler was registered for the effect's tag.
    #[error("no handler registered for effect: {effect}")]
    UnknownEffect { effect: String },

    /// A registered handler panicked while handling an effect.
    #[error("handler panicked on effect {effect}: {message}")]
    HandlerPanicked { effect: String, message: String },
}

/// Errors raised while registering effect handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// The tag is equal to, an ancestor of, or a descendant of an already registered tag.
    #[error("effect tag {tag} collides with existing registration {existing}")]
    HandlerCollision { tag: String, existing: String },
}

/// Errors returned by the [`LoopController`](crate::LoopController).
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("cannot call {operation} when in the {state} state")]
    IllegalTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Loop(#[from] LoopError),
}

/// Everything that can be handed to the diagnostic hook.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// A panic that was caught and isolated so the surrounding runner could continue.
    #[error("{context} panicked: {message}")]
    Panicked {
        context: &'static str,
        message: String,
    },
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
