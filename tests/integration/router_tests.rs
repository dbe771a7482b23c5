use std::sync::Arc;

use oxide_loop::runners::TestWorkRunner;
use oxide_loop::{
    Connectable, Connection, ConnectionError, EffectRouter, EffectTag, Emitter, FnConnectable,
    RouterError, Tagged,
};
use spin::Mutex;

use super::shared;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Effect {
    Parent,
    Child(u32),
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Parent,
    Child,
    A,
    B,
    C,
}

impl EffectTag for Kind {
    fn parent(&self) -> Option<Kind> {
        match self {
            Kind::Child => Some(Kind::Parent),
            _ => None,
        }
    }
}

impl Tagged for Effect {
    type Tag = Kind;

    fn tag(&self) -> Kind {
        match self {
            Effect::Parent => Kind::Parent,
            Effect::Child(_) => Kind::Child,
            Effect::A => Kind::A,
            Effect::B => Kind::B,
            Effect::C => Kind::C,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Handled(&'static str),
    ChildHandled(u32),
}

type Recorded<T> = Arc<Mutex<Vec<T>>>;

fn recorded<T>() -> Recorded<T> {
    Arc::new(Mutex::new(Vec::new()))
}

fn connect(router: &EffectRouter<Effect, Event>) -> (Box<dyn Connection<Effect>>, Recorded<Event>) {
    let events = recorded();
    let sink = events.clone();
    let connection = router
        .connect(Emitter::new(move |event| sink.lock().push(event)))
        .expect("router should connect");
    (connection, events)
}

#[test]
fn given_a_parent_then_a_child_registration_should_collide() {
    let result = EffectRouter::<Effect, Event>::builder()
        .add_action(Kind::Parent, || {})
        .and_then(|builder| builder.add_action(Kind::Child, || {}));

    assert!(matches!(
        result,
        Err(RouterError::HandlerCollision { ref tag, ref existing })
            if tag == "Child" && existing == "Parent"
    ));
}

#[test]
fn given_a_child_then_a_parent_registration_should_collide() {
    let result = EffectRouter::<Effect, Event>::builder()
        .add_action(Kind::Child, || {})
        .and_then(|builder| builder.add_action(Kind::Parent, || {}));

    assert!(matches!(
        result,
        Err(RouterError::HandlerCollision { ref tag, ref existing })
            if tag == "Parent" && existing == "Child"
    ));
}

#[test]
fn given_the_same_tag_twice_should_collide() {
    let result = EffectRouter::<Effect, Event>::builder()
        .add_action(Kind::A, || {})
        .and_then(|builder| builder.add_consumer(Kind::A, |_| {}));

    assert!(result.is_err());
}

#[test]
fn given_unrelated_tags_should_route_each_to_its_handler() {
    let router = EffectRouter::<Effect, Event>::builder()
        .add_function(Kind::A, |_| Event::Handled("a"))
        .and_then(|builder| builder.add_function(Kind::B, |_| Event::Handled("b")))
        .expect("unrelated tags do not collide")
        .build();
    let (connection, events) = connect(&router);

    connection.accept(Effect::B);
    connection.accept(Effect::A);

    assert_eq!(
        *events.lock(),
        vec![Event::Handled("b"), Event::Handled("a")]
    );
}

#[test]
fn given_a_child_effect_should_route_to_the_parent_handler() {
    let router = EffectRouter::<Effect, Event>::builder()
        .add_function(Kind::Parent, |effect| match effect {
            Effect::Child(value) => Event::ChildHandled(value),
            _ => Event::Handled("parent"),
        })
        .expect("single route")
        .build();
    let (connection, events) = connect(&router);

    connection.accept(Effect::Parent);
    connection.accept(Effect::Child(7));

    assert_eq!(
        *events.lock(),
        vec![Event::Handled("parent"), Event::ChildHandled(7)]
    );
}

#[test]
fn given_an_unregistered_effect_should_report_an_unknown_effect() {
    let errors = recorded();
    let sink = errors.clone();
    let router = EffectRouter::<Effect, Event>::builder()
        .add_action(Kind::A, || {})
        .and_then(|builder| builder.add_action(Kind::B, || {}))
        .expect("unrelated tags do not collide")
        .with_fatal_error_handler(move |error| sink.lock().push(error))
        .build();
    let (connection, events) = connect(&router);

    connection.accept(Effect::C);

    assert_eq!(
        *errors.lock(),
        vec![ConnectionError::UnknownEffect {
            effect: "C".to_string()
        }]
    );
    assert!(events.lock().is_empty());
}

#[test]
fn given_a_panicking_handler_should_report_it_and_keep_routing() {
    let errors = recorded();
    let sink = errors.clone();
    let router = EffectRouter::<Effect, Event>::builder()
        .add_consumer(Kind::A, |_| panic!("handler failed"))
        .and_then(|builder| builder.add_function(Kind::B, |_| Event::Handled("b")))
        .expect("unrelated tags do not collide")
        .with_fatal_error_handler(move |error| sink.lock().push(error))
        .build();
    let (connection, events) = connect(&router);

    connection.accept(Effect::A);
    connection.accept(Effect::B);

    assert_eq!(
        *errors.lock(),
        vec![ConnectionError::HandlerPanicked {
            effect: "A".to_string(),
            message: "handler failed".to_string(),
        }]
    );
    assert_eq!(*events.lock(), vec![Event::Handled("b")]);
}

#[test]
fn given_a_built_router_when_the_builder_is_extended_should_keep_its_snapshot() {
    let errors = recorded();
    let sink = errors.clone();
    let builder = EffectRouter::<Effect, Event>::builder()
        .add_function(Kind::A, |_| Event::Handled("a"))
        .expect("single route")
        .with_fatal_error_handler(move |error| sink.lock().push(error));
    let snapshot = builder.build();

    let extended = builder
        .add_function(Kind::B, |_| Event::Handled("b"))
        .expect("unrelated tags do not collide")
        .build();

    let (old_connection, old_events) = connect(&snapshot);
    old_connection.accept(Effect::B);
    assert!(old_events.lock().is_empty());
    assert_eq!(errors.lock().len(), 1);

    let (new_connection, new_events) = connect(&extended);
    new_connection.accept(Effect::B);
    assert_eq!(*new_events.lock(), vec![Event::Handled("b")]);
}

#[test]
fn given_a_route_on_its_own_runner_should_handle_effects_there() {
    let runner = Arc::new(TestWorkRunner::new());
    let handled = recorded();
    let sink = handled.clone();
    let router = EffectRouter::<Effect, Event>::builder()
        .add_consumer_on(Kind::A, shared(runner.clone()), move |effect| {
            sink.lock().push(effect)
        })
        .expect("single route")
        .build();
    let (connection, _events) = connect(&router);

    connection.accept(Effect::A);
    assert!(handled.lock().is_empty());

    runner.run_all();
    assert_eq!(*handled.lock(), vec![Effect::A]);

    connection.dispose();
    assert!(runner.is_disposed());
}

#[test]
fn given_a_disposed_connection_should_ignore_effects() {
    let handled = recorded();
    let sink = handled.clone();
    let router = EffectRouter::<Effect, Event>::builder()
        .add_consumer(Kind::A, move |effect| sink.lock().push(effect))
        .expect("single route")
        .build();
    let (connection, _events) = connect(&router);

    connection.dispose();
    connection.dispose();
    connection.accept(Effect::A);

    assert!(handled.lock().is_empty());
}

#[test]
fn given_a_handler_refusing_to_connect_should_fail_to_connect_the_router() {
    let disposals = Arc::new(Mutex::new(0));
    let counter = disposals.clone();
    let router = EffectRouter::<Effect, Event>::builder()
        .add_connectable(
            Kind::A,
            FnConnectable::new(
                move |_output: Emitter<Event>| -> Result<Box<dyn Connection<Effect>>, ConnectionError> {
                    let counter = counter.clone();
                    Ok(Box::new(oxide_loop::FnConnection::new(
                        |_: Effect| {},
                        move || *counter.lock() += 1,
                    )))
                },
            ),
        )
        .and_then(|builder| {
            builder.add_connectable(
                Kind::B,
                FnConnectable::new(
                    |_output: Emitter<Event>| -> Result<Box<dyn Connection<Effect>>, ConnectionError> {
                        Err(ConnectionError::LimitExceeded)
                    },
                ),
            )
        })
        .expect("unrelated tags do not collide")
        .build();

    let result = router.connect(Emitter::new(|_| {}));

    assert!(matches!(result, Err(ConnectionError::LimitExceeded)));
    assert_eq!(*disposals.lock(), 1);
}
