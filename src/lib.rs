//! A unidirectional data flow loop engine for Rust.
//!
//! A loop owns a model and applies a pure [`Update`] function to it one event at
//! a time. Each update may replace the model and request effects; new models are
//! published to observers, and effects are handed to an effect handler (usually
//! an [`EffectRouter`]) which may feed new events back into the loop.
//!
//! Where work runs is decided by injected [`WorkRunner`](runners::WorkRunner)s, and
//! [`LoopController`] starts and stops loops as a view attaches and detaches.
//!
//! ## Example
//!
//! ```rust
//! use oxide_loop::{effects, runners, EffectRouter, EffectTag, LoopBuilder, LoopFactory, Next, Tagged};
//!
//! #[derive(Debug)]
//! enum Event { Increment, Saved(u32) }
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! enum Effect { Save(u32) }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum EffectKind { Save }
//!
//! impl EffectTag for EffectKind {}
//!
//! impl Tagged for Effect {
//!     type Tag = EffectKind;
//!     fn tag(&self) -> EffectKind {
//!         EffectKind::Save
//!     }
//! }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Model { count: u32, saved: Option<u32> }
//!
//! fn update(model: &Model, event: Event) -> Next<Model, Effect> {
//!     match event {
//!         Event::Increment => {
//!             let count = model.count + 1;
//!             Next::next_with(Model { count, ..model.clone() }, effects![Effect::Save(count)])
//!         }
//!         Event::Saved(count) => Next::next(Model { saved: Some(count), ..model.clone() }),
//!     }
//! }
//!
//! let router = EffectRouter::<Effect, Event>::builder()
//!     .add_function(EffectKind::Save, |Effect::Save(count)| Event::Saved(count))
//!     .expect("single route")
//!     .build();
//!
//! let running = LoopBuilder::new(update, router)
//!     .event_runner(runners::factory(runners::immediate))
//!     .effect_runner(runners::factory(runners::immediate))
//!     .start_from(Model { count: 0, saved: None })
//!     .unwrap();
//!
//! running.dispatch_event(Event::Increment).unwrap();
//!
//! assert_eq!(running.most_recent_model(), Some(Model { count: 1, saved: Some(1) }));
//! running.dispose();
//! ```

// Module declarations
mod connection;
mod controller;
mod dispatcher;
mod effect;
mod emitter;
mod error;
pub mod hooks;
mod logic;
mod renderer;
mod router;
pub mod runners;
mod runtime;

// Public re-exports
pub use connection::{
    Connectable, Connection, Disposable, EventSource, FnConnectable, FnConnection,
    MergedEventSource, SafeConnectable,
};
pub use controller::{ControllerBuilder, LoopController};
pub use dispatcher::MessageDispatcher;
pub use effect::{First, Next};
pub use emitter::Emitter;
pub use error::{panic_message, ConnectionError, ControllerError, Error, LoopError, RouterError};
pub use logic::{Init, Update};
pub use renderer::{Renderer, View};
pub use router::{EffectRouter, EffectRouterBuilder, EffectTag, Tagged};
pub use runners::Spawner;
pub use runtime::{Logger, Loop, LoopBuilder, LoopFactory, NoopLogger, TracingLogger};

// Test utilities (only available with 'testing' feature or during tests)
#[cfg(any(test, feature = "testing"))]
pub use renderer::RecordingObserver;
