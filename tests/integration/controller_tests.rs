use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use oxide_loop::runners::{self, RunnerFactory, TestWorkRunner};
use oxide_loop::{
    Connection, ConnectionError, ControllerBuilder, ControllerError, Emitter, First,
    FnConnectable, FnConnection, LoopBuilder, LoopController, Next, RecordingObserver, Renderer,
    View,
};
use spin::Mutex;

use super::shared;

type TextController = LoopController<String, String, ()>;

fn append(model: &String, event: String) -> Next<String, ()> {
    Next::next(format!("{model}-{event}"))
}

fn text_loop() -> LoopBuilder<String, String, ()> {
    text_loop_on(runners::factory(runners::immediate), Arc::new(AtomicBool::new(false)))
}

/// A text loop processing events on `events`, flagging `closed` when its
/// effect connection is disposed.
fn text_loop_on(events: RunnerFactory, closed: Arc<AtomicBool>) -> LoopBuilder<String, String, ()> {
    let effects = FnConnectable::new(
        move |_events: Emitter<String>| -> Result<Box<dyn Connection<()>>, ConnectionError> {
            let closed = closed.clone();
            Ok(Box::new(FnConnection::new(
                |_: ()| {},
                move || closed.store(true, Ordering::SeqCst),
            )))
        },
    );
    LoopBuilder::new(append, effects)
        .event_runner(events)
        .effect_runner(runners::factory(runners::immediate))
}

/// Run `operation` on another thread, failing if it does not finish promptly.
fn within_timeout<T: Send + 'static>(operation: impl FnOnce() -> T + Send + 'static) -> T {
    let (sender, receiver) = flume::bounded(1);
    std::thread::spawn(move || {
        sender.send(operation()).ok();
    });
    receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("operation should not block")
}

/// A view calling back into its controller while rendering.
struct CallbackView {
    controller: Arc<Mutex<Weak<TextController>>>,
    seen: Arc<Mutex<Vec<(bool, String)>>>,
    stop_at: Option<&'static str>,
}

impl Renderer<String> for CallbackView {
    fn render(&mut self, model: String) {
        let controller = self.controller.lock().upgrade();
        let Some(controller) = controller else { return };
        self.seen
            .lock()
            .push((controller.is_running(), controller.model()));
        if self.stop_at == Some(model.as_str()) {
            controller.stop().expect("view should be able to stop the loop");
        }
    }
}

fn given_a_callback_view(
    stop_at: Option<&'static str>,
) -> (Arc<TextController>, Arc<Mutex<Vec<(bool, String)>>>, TestView) {
    let controller: Arc<TextController> =
        Arc::new(ControllerBuilder::new(text_loop(), "default".to_string()).build());
    let handle = Arc::new(Mutex::new(Arc::downgrade(&controller)));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let emitter = TestView::new();

    let (view_handle, view_seen, view_events) = (handle, seen.clone(), emitter.events.clone());
    controller
        .connect(View::new(move |events: Emitter<String>| {
            *view_events.lock() = Some(events);
            CallbackView {
                controller: view_handle.clone(),
                seen: view_seen.clone(),
                stop_at,
            }
        }))
        .expect("controller should accept a view");
    (controller, seen, emitter)
}

/// A view recording every model it renders and exposing the emitter it was given.
struct TestView {
    models: RecordingObserver<String>,
    events: Arc<Mutex<Option<Emitter<String>>>>,
}

impl TestView {
    fn new() -> Self {
        Self {
            models: RecordingObserver::new(),
            events: Arc::new(Mutex::new(None)),
        }
    }

    fn connectable(
        &self,
    ) -> View<impl Fn(Emitter<String>) -> RecordingObserver<String> + Send + Sync, String, String>
    {
        let models = self.models.clone();
        let events = self.events.clone();
        View::new(move |emitter: Emitter<String>| {
            *events.lock() = Some(emitter);
            models.clone()
        })
    }

    fn emit(&self, event: &str) {
        let emitter = self.events.lock().clone().expect("view should be connected");
        emitter.emit(event.to_string());
    }
}

fn given_a_connected_controller() -> (TextController, TestView) {
    let controller = ControllerBuilder::new(text_loop(), "default".to_string()).build();
    let view = TestView::new();
    controller
        .connect(view.connectable())
        .expect("controller should accept a view");
    (controller, view)
}

#[test]
fn given_a_view_should_render_start_event_stop_and_resume() {
    let (controller, view) = given_a_connected_controller();
    assert!(!controller.is_running());
    assert_eq!(controller.model(), "default");

    controller.start().unwrap();
    assert!(controller.is_running());
    assert_eq!(view.models.last().as_deref(), Some("default"));

    view.emit("x");
    assert_eq!(view.models.last().as_deref(), Some("default-x"));

    controller.stop().unwrap();
    assert!(!controller.is_running());
    assert_eq!(controller.model(), "default-x");

    controller.start().unwrap();
    view.emit("y");
    assert_eq!(
        view.models.models(),
        vec!["default", "default-x", "default-x", "default-x-y"]
    );
}

#[test]
fn given_a_stopped_controller_should_drop_view_events() {
    let (controller, view) = given_a_connected_controller();
    controller.start().unwrap();
    controller.stop().unwrap();

    view.emit("ignored");

    assert_eq!(controller.model(), "default");
    assert_eq!(view.models.count(), 1);
}

#[test]
fn given_no_view_should_refuse_to_start() {
    let controller: TextController =
        ControllerBuilder::new(text_loop(), "default".to_string()).build();

    let result = controller.start();

    assert!(matches!(
        result,
        Err(ControllerError::IllegalTransition {
            operation: "start",
            state: "init"
        })
    ));
}

#[test]
fn given_a_connected_view_should_refuse_a_second_view() {
    let (controller, _view) = given_a_connected_controller();

    let result = controller.connect(TestView::new().connectable());

    assert!(matches!(
        result,
        Err(ControllerError::IllegalTransition {
            operation: "connect",
            state: "created"
        })
    ));
}

#[test]
fn given_a_running_controller_should_refuse_to_disconnect() {
    let (controller, _view) = given_a_connected_controller();
    controller.start().unwrap();

    let result = controller.disconnect();

    assert!(matches!(
        result,
        Err(ControllerError::IllegalTransition {
            operation: "disconnect",
            state: "running"
        })
    ));
    assert!(controller.is_running());
}

#[test]
fn given_a_created_controller_should_refuse_to_stop() {
    let (controller, _view) = given_a_connected_controller();

    assert!(matches!(
        controller.stop(),
        Err(ControllerError::IllegalTransition {
            operation: "stop",
            state: "created"
        })
    ));
}

#[test]
fn given_a_disconnected_view_should_accept_a_new_view() {
    let (controller, old_view) = given_a_connected_controller();
    controller.disconnect().unwrap();

    let new_view = TestView::new();
    controller.connect(new_view.connectable()).unwrap();
    controller.start().unwrap();
    old_view.emit("stale");

    assert_eq!(new_view.models.models(), vec!["default"]);
    assert_eq!(old_view.models.count(), 0);
}

#[test]
fn given_a_replaced_model_should_start_from_it() {
    let (controller, view) = given_a_connected_controller();

    controller.replace_model("replaced".to_string()).unwrap();
    controller.start().unwrap();

    assert_eq!(view.models.last().as_deref(), Some("replaced"));
}

#[test]
fn given_a_running_controller_when_model_replaced_should_restart_from_it() {
    let (controller, view) = given_a_connected_controller();
    controller.start().unwrap();
    view.emit("x");

    controller.replace_model("fresh".to_string()).unwrap();
    view.emit("y");

    assert!(controller.is_running());
    assert_eq!(controller.model(), "fresh-y");
    assert_eq!(
        view.models.models(),
        vec!["default", "default-x", "fresh", "fresh-y"]
    );
}

#[test]
fn given_an_init_should_run_it_on_every_start() {
    let controller: TextController = ControllerBuilder::new(text_loop(), "default".to_string())
        .init(|model: String| First::first(format!("{model}!")))
        .build();
    let view = TestView::new();
    controller.connect(view.connectable()).unwrap();

    controller.start().unwrap();
    controller.stop().unwrap();
    controller.start().unwrap();

    assert_eq!(view.models.models(), vec!["default!", "default!!"]);
}

#[test]
fn given_a_main_runner_should_render_only_when_it_runs() {
    let main = Arc::new(TestWorkRunner::new());
    let controller: TextController = ControllerBuilder::new(text_loop(), "default".to_string())
        .main_runner(shared(main.clone()))
        .build();
    let view = TestView::new();
    controller.connect(view.connectable()).unwrap();

    controller.start().unwrap();
    assert_eq!(view.models.count(), 0);

    main.run_all();
    assert_eq!(view.models.models(), vec!["default"]);
}

#[test]
fn given_an_init_should_resume_from_its_model_before_any_event_is_processed() {
    let events = Arc::new(TestWorkRunner::new());
    let closed = Arc::new(AtomicBool::new(false));
    let controller: TextController =
        ControllerBuilder::new(text_loop_on(shared(events.clone()), closed), "default".to_string())
            .init(|model: String| First::first(format!("{model}!")))
            .build();
    controller.connect(TestView::new().connectable()).unwrap();

    controller.start().unwrap();
    assert_eq!(controller.model(), "default!");

    controller.stop().unwrap();
    assert_eq!(controller.model(), "default!");
}

#[test]
fn given_a_view_querying_the_controller_while_rendering_should_not_block() {
    let (controller, seen, _view) = given_a_callback_view(None);

    let starting = controller.clone();
    within_timeout(move || starting.start()).unwrap();

    assert_eq!(*seen.lock(), vec![(true, "default".to_string())]);
}

#[test]
fn given_a_view_stopping_the_controller_while_rendering_should_stop() {
    let (controller, seen, view) = given_a_callback_view(Some("default-x"));
    let starting = controller.clone();
    within_timeout(move || starting.start()).unwrap();

    within_timeout(move || view.emit("x"));

    assert!(!controller.is_running());
    assert_eq!(controller.model(), "default-x");
    assert_eq!(
        *seen.lock(),
        vec![
            (true, "default".to_string()),
            (true, "default-x".to_string())
        ]
    );
}

#[test]
fn given_a_dropped_running_controller_should_dispose_its_loop() {
    let closed = Arc::new(AtomicBool::new(false));
    let controller: TextController = ControllerBuilder::new(
        text_loop_on(runners::factory(runners::immediate), closed.clone()),
        "default".to_string(),
    )
    .build();
    let view = TestView::new();
    controller.connect(view.connectable()).unwrap();
    controller.start().unwrap();

    drop(controller);
    view.emit("late");

    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(view.models.models(), vec!["default"]);
}
