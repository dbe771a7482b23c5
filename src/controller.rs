//! Lifecycle management for a loop bound to a view.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use spin::Mutex;

use crate::connection::{Connectable, Connection, Disposable, SafeConnectable};
use crate::runners::{self, RunnerFactory, WorkRunner};
use crate::{hooks, ControllerError, Emitter, Error, Init, Loop, LoopError, LoopFactory};

/// Configures a [`LoopController`].
pub struct ControllerBuilder<M, E, F: Eq + Hash> {
    factory: Arc<dyn LoopFactory<M, E, F>>,
    default_model: M,
    init: Option<Arc<dyn Init<M, F>>>,
    main_runner: RunnerFactory,
}

impl<M, E, F> ControllerBuilder<M, E, F>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    pub fn new<L: LoopFactory<M, E, F> + 'static>(factory: L, default_model: M) -> Self {
        Self {
            factory: Arc::new(factory),
            default_model,
            init: None,
            main_runner: runners::factory(runners::immediate),
        }
    }

    /// Run `init` on the current model every time the loop is started.
    pub fn init<I: Init<M, F> + 'static>(mut self, init: I) -> Self {
        self.init = Some(Arc::new(init));
        self
    }

    /// Runner on which the view receives models. Defaults to the runner that
    /// publishes them.
    pub fn main_runner(mut self, factory: RunnerFactory) -> Self {
        self.main_runner = factory;
        self
    }

    pub fn build(self) -> LoopController<M, E, F> {
        LoopController {
            factory: self.factory,
            init: self.init,
            main_runner: self.main_runner,
            state: Mutex::new(State::Init {
                model: self.default_model,
            }),
            active: Arc::new(Mutex::new(None)),
        }
    }
}

enum State<M, E, F: Eq + Hash> {
    Init {
        model: M,
    },
    Created {
        model: M,
        view: Arc<dyn Connection<M>>,
    },
    Running {
        view: Arc<dyn Connection<M>>,
        session: Session<M, E, F>,
    },
}

impl<M, E, F: Eq + Hash> State<M, E, F> {
    fn name(&self) -> &'static str {
        match self {
            State::Init { .. } => "init",
            State::Created { .. } => "created",
            State::Running { .. } => "running",
        }
    }
}

type Observation = Arc<Mutex<Option<Box<dyn Disposable>>>>;

struct Session<M, E, F: Eq + Hash> {
    running: Loop<M, E, F>,
    start_model: M,
    observation: Observation,
    main: Arc<dyn WorkRunner>,
    live: Arc<AtomicBool>,
}

impl<M, E, F: Eq + Hash> Session<M, E, F> {
    /// Stop delivering to the view and release the loop and the main runner.
    fn close(&self) {
        self.live.store(false, Ordering::Release);
        if let Some(observation) = self.observation.lock().take() {
            observation.dispose();
        }
        self.running.dispose();
        self.main.dispose();
    }
}

/// The half of starting a session that may call into the view, run after the
/// state lock is released.
struct Attachment<M, E, F: Eq + Hash> {
    running: Loop<M, E, F>,
    view: Arc<dyn Connection<M>>,
    main: Arc<dyn WorkRunner>,
    live: Arc<AtomicBool>,
    observation: Observation,
}

/// Binds a loop to a view and manages start and stop across the view's lifetime.
///
/// The controller moves through three states. It starts in `init`; connecting a
/// view moves it to `created`, and starting moves it to `running`. Stopping
/// returns to `created` keeping the last model, so the next start resumes from
/// there. Operations invalid in the current state fail with
/// [`ControllerError::IllegalTransition`].
///
/// The view may query the controller or stop it while rendering. Calls that
/// render again (`start` and `replace_model`) must not be made from inside
/// `render` when models are delivered on the rendering thread.
pub struct LoopController<M, E, F: Eq + Hash> {
    factory: Arc<dyn LoopFactory<M, E, F>>,
    init: Option<Arc<dyn Init<M, F>>>,
    main_runner: RunnerFactory,
    state: Mutex<State<M, E, F>>,
    // Kept apart from `state` so view events never contend with transitions.
    active: Arc<Mutex<Option<Loop<M, E, F>>>>,
}

impl<M, E, F> LoopController<M, E, F>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    /// Attach a view. Models flow into it while running; its events flow into
    /// the loop while running and are dropped otherwise.
    pub fn connect<V>(&self, view: V) -> Result<(), ControllerError>
    where
        V: Connectable<M, E> + 'static,
    {
        let mut state = self.state.lock();
        let model = match &*state {
            State::Init { model } => model.clone(),
            other => return Err(illegal("connect", other)),
        };

        let active = Arc::downgrade(&self.active);
        let events = Emitter::new(move |event: E| {
            let running = Weak::upgrade(&active).and_then(|active| {
                let running = active.lock().clone();
                running
            });
            match running {
                Some(running) => {
                    if let Err(error) = running.dispatch_event(event) {
                        tracing::debug!(%error, "dropping view event");
                    }
                }
                None => tracing::debug!("dropping view event, loop not running"),
            }
        });

        let connection = SafeConnectable::new(view)
            .connect(events)
            .map_err(LoopError::from)?;

        *state = State::Created {
            model,
            view: Arc::from(connection),
        };
        Ok(())
    }

    /// Detach the view. Not allowed while running.
    pub fn disconnect(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        let (model, view) = match &*state {
            State::Created { model, view } => (model.clone(), view.clone()),
            other => return Err(illegal("disconnect", other)),
        };

        view.dispose();
        *state = State::Init { model };
        Ok(())
    }

    /// Start a loop from the current model.
    pub fn start(&self) -> Result<(), ControllerError> {
        let attachment = {
            let mut state = self.state.lock();
            let (model, view) = match &*state {
                State::Created { model, view } => (model.clone(), view.clone()),
                other => return Err(illegal("start", other)),
            };

            let (session, attachment) = self.begin(model, view.clone())?;
            *state = State::Running { view, session };
            attachment
        };

        attach(attachment);
        Ok(())
    }

    /// Stop the running loop, keeping its last model for the next start.
    pub fn stop(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        if !matches!(&*state, State::Running { .. }) {
            return Err(illegal("stop", &*state));
        }

        let resume = self.current_model_of(&state);
        if let State::Running { view, session } =
            core::mem::replace(&mut *state, State::Init { model: resume })
        {
            let model = self.end(session);
            *state = State::Created { model, view };
        }
        Ok(())
    }

    /// Replace the model the next start will use.
    ///
    /// While running, the loop is restarted from `model`.
    pub fn replace_model(&self, model: M) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Init { model: current } | State::Created { model: current, .. } => {
                *current = model;
                return Ok(());
            }
            State::Running { .. } => {}
        }

        let mut attachment = None;
        if let State::Running { view, session } = core::mem::replace(
            &mut *state,
            State::Init {
                model: model.clone(),
            },
        ) {
            self.end(session);
            *state = State::Created {
                model: model.clone(),
                view: view.clone(),
            };
            let (session, pending) = self.begin(model, view.clone())?;
            *state = State::Running { view, session };
            attachment = Some(pending);
        }
        drop(state);

        if let Some(attachment) = attachment {
            attach(attachment);
        }
        Ok(())
    }

    /// The current model: the loop's latest model while running, otherwise the
    /// model the next start will use.
    pub fn model(&self) -> M {
        let state = self.state.lock();
        self.current_model_of(&state)
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), State::Running { .. })
    }

    fn current_model_of(&self, state: &State<M, E, F>) -> M {
        match state {
            State::Init { model } | State::Created { model, .. } => model.clone(),
            State::Running { session, .. } => session
                .running
                .most_recent_model()
                .unwrap_or_else(|| session.start_model.clone()),
        }
    }

    fn begin(
        &self,
        model: M,
        view: Arc<dyn Connection<M>>,
    ) -> Result<(Session<M, E, F>, Attachment<M, E, F>), ControllerError> {
        let (running, start_model) = match &self.init {
            Some(init) => {
                let (first, effects) = init.init(model).into_parts();
                (self.factory.start_with(first.clone(), effects)?, first)
            }
            None => (self.factory.start_from(model.clone())?, model),
        };

        let main: Arc<dyn WorkRunner> = Arc::from((self.main_runner)());
        let live = Arc::new(AtomicBool::new(true));
        let observation: Observation = Arc::new(Mutex::new(None));

        *self.active.lock() = Some(running.clone());
        tracing::debug!("loop controller started");

        let attachment = Attachment {
            running: running.clone(),
            view,
            main: main.clone(),
            live: live.clone(),
            observation: observation.clone(),
        };
        let session = Session {
            running,
            start_model,
            observation,
            main,
            live,
        };
        Ok((session, attachment))
    }

    /// Tear down a session, returning the model to resume from.
    fn end(&self, session: Session<M, E, F>) -> M {
        *self.active.lock() = None;
        let model = session
            .running
            .most_recent_model()
            .unwrap_or_else(|| session.start_model.clone());
        session.close();
        tracing::debug!("loop controller stopped");
        model
    }
}

impl<M, E, F: Eq + Hash> Drop for LoopController<M, E, F> {
    fn drop(&mut self) {
        *self.active.lock() = None;
        if let State::Running { session, .. } = self.state.get_mut() {
            session.close();
        }
    }
}

/// Route the session's models to the view. A session ended before this runs
/// stays detached.
fn attach<M, E, F>(attachment: Attachment<M, E, F>)
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    let Attachment {
        running,
        view,
        main,
        live,
        observation,
    } = attachment;

    let gate = live.clone();
    let observed = running.observe(move |model: M| {
        let view = view.clone();
        let gate = gate.clone();
        main.post(Box::new(move || {
            if gate.load(Ordering::Acquire) {
                view.accept(model);
            }
        }));
    });

    match observed {
        Ok(handle) => {
            let mut slot = observation.lock();
            if live.load(Ordering::Acquire) {
                *slot = Some(handle);
            } else {
                drop(slot);
                handle.dispose();
            }
        }
        Err(error) => tracing::debug!(%error, "session ended before the view was attached"),
    }
}

fn illegal<M, E, F: Eq + Hash>(
    operation: &'static str,
    state: &State<M, E, F>,
) -> ControllerError {
    let state = state.name();
    hooks::handle_error(&Error::Controller(ControllerError::IllegalTransition {
        operation,
        state,
    }));
    ControllerError::IllegalTransition { operation, state }
}
