//! Attach-time validation: each rule rejects before any broker resource exists.

use mq_listener::service::{ParamType, ValidationError, ON_ERROR, ON_MESSAGE};
use mq_listener::{ListenerError, Service};

use crate::support::{harness, queue};

fn rejected(service: &Service) -> ValidationError {
    let h = harness();
    let err = h.listener.attach(service).unwrap_err();
    assert_eq!(h.broker.sessions_created(), 0);
    assert_eq!(h.broker.consumers_created(), 0);
    assert!(h.listener.attached().is_empty());
    match err {
        ListenerError::Validation(err) => err,
        other => panic!("expected a validation error, got {}", other),
    }
}

fn configured() -> Service {
    Service::new().with_config(queue("orders"))
}

#[test]
fn service_without_config_is_rejected() {
    let err = rejected(&Service::new().on_message(|_| Ok(())));
    assert_eq!(err, ValidationError::MissingConfig);
    assert_eq!(err.rule(), 1);
}

#[test]
fn resource_methods_are_rejected() {
    let err = rejected(&configured().on_message(|_| Ok(())).resource("/orders"));
    assert_eq!(err.rule(), 2);
}

#[test]
fn zero_or_three_entry_points_are_rejected() {
    let err = rejected(&configured());
    assert_eq!(err, ValidationError::EntryPointCount(0));

    let three = configured()
        .on_message(|_| Ok(()))
        .on_error(|_| Ok(()))
        .remote("on_close", vec![], |_| Ok(()));
    let err = rejected(&three);
    assert_eq!(err, ValidationError::EntryPointCount(3));
    assert_eq!(err.rule(), 3);
}

#[test]
fn mistyped_on_message_parameter_is_rejected() {
    let service = configured().remote(
        ON_MESSAGE,
        vec![ParamType::Message, ParamType::Other("String".into())],
        |_| Ok(()),
    );
    let err = rejected(&service);
    assert_eq!(err, ValidationError::OnMessageParamType("String".into()));
    assert_eq!(err.rule(), 4);
}

#[test]
fn mistyped_on_error_parameter_is_rejected() {
    let service = configured()
        .on_message(|_| Ok(()))
        .remote(ON_ERROR, vec![ParamType::Message], |_| Ok(()));
    let err = rejected(&service);
    assert_eq!(err, ValidationError::OnErrorParamType("Message".into()));
    assert_eq!(err.rule(), 5);
    assert!(err.to_string().starts_with("rule 5: "));
}

#[test]
fn invalid_subscription_settings_are_configuration_errors() {
    let h = harness();
    let service = Service::new()
        .with_config(crate::support::topic("prices").durable(""))
        .on_message(|_| Ok(()));
    let err = h.listener.attach(&service).unwrap_err();
    assert_eq!(err.kind(), mq_listener::ErrorKind::Configuration);
    assert_eq!(h.broker.sessions_created(), 0);
}
