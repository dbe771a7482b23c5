//! Transition results: [`Next`] from an update and [`First`] from an init.

use std::collections::HashSet;
use std::hash::Hash;

/// Build a `HashSet` of effects. Equal effects collapse into one.
///
/// ```rust
/// use oxide_loop::effects;
///
/// let set = effects![1, 2, 2, 3];
/// assert_eq!(set.len(), 3);
///
/// let none: std::collections::HashSet<u8> = effects![];
/// assert!(none.is_empty());
/// ```
#[macro_export]
macro_rules! effects {
    () => {
        ::std::collections::HashSet::new()
    };
    ($($effect:expr),+ $(,)?) => {{
        let mut set = ::std::collections::HashSet::new();
        $(set.insert($effect);)+
        set
    }};
}

/// The outcome of an [`Update`](crate::Update): an optional new model and a set of effects.
///
/// A `Next` without a model means "no change". The loop never publishes a model
/// for it, even when it carries effects.
///
/// # Example
///
/// ```rust
/// use oxide_loop::{effects, Next};
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// enum Effect { Save }
///
/// let changed: Next<u32, Effect> = Next::next_with(2, effects![Effect::Save]);
/// assert!(changed.has_model());
///
/// let unchanged: Next<u32, Effect> = Next::dispatch(effects![Effect::Save]);
/// assert_eq!(unchanged.model_or_else(7), 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Next<M, F: Eq + Hash> {
    model: Option<M>,
    effects: HashSet<F>,
}

impl<M, F: Eq + Hash> Next<M, F> {
    /// A new model and no effects.
    pub fn next(model: M) -> Self {
        Self {
            model: Some(model),
            effects: HashSet::new(),
        }
    }

    /// A new model and some effects.
    pub fn next_with(model: M, effects: HashSet<F>) -> Self {
        Self {
            model: Some(model),
            effects,
        }
    }

    /// No model change, only effects.
    pub fn dispatch(effects: HashSet<F>) -> Self {
        Self {
            model: None,
            effects,
        }
    }

    /// Neither a model change nor effects.
    pub fn no_change() -> Self {
        Self {
            model: None,
            effects: HashSet::new(),
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    pub fn effects(&self) -> &HashSet<F> {
        &self.effects
    }

    /// The new model if there is one, otherwise `fallback`.
    pub fn model_or_else(self, fallback: M) -> M {
        self.model.unwrap_or(fallback)
    }

    pub fn into_parts(self) -> (Option<M>, HashSet<F>) {
        (self.model, self.effects)
    }
}

/// The outcome of an [`Init`](crate::Init): a starting model and start effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct First<M, F: Eq + Hash> {
    model: M,
    effects: HashSet<F>,
}

impl<M, F: Eq + Hash> First<M, F> {
    pub fn first(model: M) -> Self {
        Self {
            model,
            effects: HashSet::new(),
        }
    }

    pub fn first_with(model: M, effects: HashSet<F>) -> Self {
        Self { model, effects }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn effects(&self) -> &HashSet<F> {
        &self.effects
    }

    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    pub fn into_parts(self) -> (M, HashSet<F>) {
        (self.model, self.effects)
    }
}
