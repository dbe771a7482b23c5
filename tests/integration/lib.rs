
use std::collections::HashSet;
use std::sync::Arc;

use oxide_loop::runners::{self, RunnerFactory, TestWorkRunner};
use oxide_loop::{EffectRouter, Loop, LoopBuilder, LoopFactory, RecordingObserver};
pub(crate) use counter_logic::*;

mod controller_tests;
mod router_tests;

pub(crate) type TestLoop = Loop<TestModel, TestEvent, TestEffect>;

/// A loop over the counter logic, with manually stepped runners unless
/// configured otherwise.
pub(crate) struct LoopTest {
    pub(crate) running: TestLoop,
    pub(crate) models: RecordingObserver<TestModel>,
    pub(crate) events: Arc<TestWorkRunner>,
    pub(crate) effects: Arc<TestWorkRunner>,
}

impl LoopTest {
    /// Step both runners until neither has work left.
    pub(crate) fn run_until_idle(&self) {
        while self.events.pending() > 0 || self.effects.pending() > 0 {
            self.events.run_all();
            self.effects.run_all();
        }
    }

    pub(crate) fn dispatch(&self, events: impl IntoIterator<Item = TestEvent>) {
        for event in events {
            self.running
                .dispatch_event(event)
                .expect("loop should accept events");
        }
    }
}

pub(crate) struct LoopTestBuilder {
    storage: MockStorage,
    notifier: MockNotifier,
    with_init: bool,
    immediate: bool,
    start_effects: Option<HashSet<TestEffect>>,
}

pub(crate) fn build_loop_test() -> LoopTestBuilder {
    let mut storage = MockStorage::new();
    storage.expect_save().returning(|_| ());
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().returning(|| ());

    LoopTestBuilder {
        storage,
        notifier,
        with_init: false,
        immediate: false,
        start_effects: None,
    }
}

impl LoopTestBuilder {
    pub(crate) fn given_storage(mut self, storage: MockStorage) -> Self {
        self.storage = storage;
        self
    }

    pub(crate) fn given_notifier(mut self, notifier: MockNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub(crate) fn given_init(mut self) -> Self {
        self.with_init = true;
        self
    }

    pub(crate) fn given_immediate_runners(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub(crate) fn given_start_effects(mut self, effects: HashSet<TestEffect>) -> Self {
        self.start_effects = Some(effects);
        self
    }

    pub(crate) fn loop_builder(
        self,
    ) -> (
        LoopBuilder<TestModel, TestEvent, TestEffect>,
        Arc<TestWorkRunner>,
        Arc<TestWorkRunner>,
    ) {
        let events = Arc::new(TestWorkRunner::new());
        let effects = Arc::new(TestWorkRunner::new());

        let mut builder = LoopBuilder::new(update, counter_router(self.storage, self.notifier));
        if self.with_init {
            builder = builder.init(init);
        }
        builder = if self.immediate {
            builder
                .event_runner(runners::factory(runners::immediate))
                .effect_runner(runners::factory(runners::immediate))
        } else {
            builder
                .event_runner(shared(events.clone()))
                .effect_runner(shared(effects.clone()))
        };

        (builder, events, effects)
    }

    pub(crate) fn build(self) -> LoopTest {
        let start_effects = self.start_effects.clone();
        let (builder, events, effects) = self.loop_builder();

        let start = TestModel::with_count(0);
        let running = match start_effects {
            Some(start_effects) => builder.start_with(start, start_effects),
            None => builder.start_from(start),
        }
        .expect("loop should start");

        let models = RecordingObserver::new();
        running
            .observe(models.observer())
            .expect("loop should accept observers");

        LoopTest {
            running,
            models,
            events,
            effects,
        }
    }
}

/// Saves through `storage` and reports back with `Saved`; notifies through `notifier`.
pub(crate) fn counter_router(
    storage: MockStorage,
    notifier: MockNotifier,
) -> EffectRouter<TestEffect, TestEvent> {
    EffectRouter::builder()
        .add_function(TestEffectKind::Save, move |effect| match effect {
            TestEffect::Save(count) => {
                storage.save(count);
                TestEvent::Saved(count)
            }
            other => panic!("unexpected effect {other:?}"),
        })
        .and_then(|builder| builder.add_action(TestEffectKind::Notify, move || notifier.notify()))
        .expect("counter routes do not collide")
        .build()
}

/// A factory handing out the same stepped runner every time.
pub(crate) fn shared(runner: Arc<TestWorkRunner>) -> RunnerFactory {
    runners::factory(move || runner.clone())
}
