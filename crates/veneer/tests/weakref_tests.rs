use pretty_assertions::assert_eq;
use veneer::{CallArgs, ErrorKind, Kind, Machine, Value, decorator};

#[test]
fn weak_proxy_forwards_while_the_target_is_live() {
    let mut machine = Machine::new();
    let list = machine
        .list_value(vec![Value::Int(1), Value::Int(2)])
        .unwrap();
    let weak = machine.new_weak_proxy(list).unwrap();

    assert_eq!(machine.kind_of(weak).unwrap(), Kind::WeakProxy);
    assert_eq!(machine.target_kind(weak).unwrap(), Kind::List);
    assert_eq!(machine.len(weak).unwrap(), 2);
    assert_eq!(machine.get_item(weak, Value::Int(0)).unwrap(), Value::Int(1));
    assert_eq!(machine.getattr(weak, "__wrapped__").unwrap(), list);
}

#[test]
fn weak_proxy_does_not_keep_the_target_alive() {
    let mut machine = Machine::new();
    let list = machine.list_value(vec![]).unwrap();
    let live_before = machine.live_objects();
    let weak = machine.new_weak_proxy(list).unwrap();

    assert!(machine.release(list));
    assert!(!machine.release(list));
    assert_eq!(machine.live_objects(), live_before);

    // The proxy slot itself is still live; only the target died.
    assert_eq!(machine.kind_of(weak).unwrap(), Kind::WeakProxy);
}

#[test]
fn operations_after_expiry_fail_synchronously() {
    let mut machine = Machine::new();
    let list = machine.list_value(vec![Value::Int(1)]).unwrap();
    let weak = machine.new_weak_proxy(list).unwrap();
    machine.release(list);

    let err = machine.len(weak).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
    let err = machine.getattr(weak, "__wrapped__").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
    let err = machine.get_item(weak, Value::Int(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
    let err = machine.truthy(weak).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
    assert!(err.message().contains("no longer exists"), "{err}");
}

#[test]
fn repr_reports_expiry_instead_of_failing() {
    let mut machine = Machine::new();
    let list = machine.list_value(vec![]).unwrap();
    let weak = machine.new_weak_proxy(list).unwrap();

    let live_repr = machine.repr(weak).unwrap();
    assert!(live_repr.contains("to 'list'"), "{live_repr}");

    machine.release(list);
    let dead_repr = machine.repr(weak).unwrap();
    assert!(dead_repr.contains("dead"), "{dead_repr}");
}

#[test]
fn calling_through_a_weak_proxy() {
    let mut machine = Machine::new();
    let answer = machine
        .function("answer", |_, _| Ok(Value::Int(42)))
        .unwrap();
    let weak = machine.new_weak_proxy(answer).unwrap();

    assert_eq!(machine.call(weak, CallArgs::none()).unwrap(), Value::Int(42));

    machine.release(answer);
    let err = machine.call(weak, CallArgs::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
}

#[test]
fn decorating_a_weakly_referenced_function() {
    let mut machine = Machine::new();
    let answer = machine
        .function("answer", |_, _| Ok(Value::Int(42)))
        .unwrap();
    let weak = machine.new_weak_proxy(answer).unwrap();

    let passthrough = decorator(|machine, wrapped, _instance, args| machine.call(wrapped, args));
    let wrapper = passthrough.apply(&mut machine, weak).unwrap();
    assert_eq!(machine.call(wrapper, CallArgs::none()).unwrap(), Value::Int(42));

    machine.release(answer);
    let err = machine.call(wrapper, CallArgs::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
}

#[test]
fn weak_proxies_require_heap_targets() {
    let mut machine = Machine::new();
    let err = machine.new_weak_proxy(Value::Int(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
    let err = machine.new_weak_proxy(Value::None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn attribute_forwarding_and_mutation_through_weak_proxy() {
    let mut machine = Machine::new();
    let class = machine.new_class("Point").unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();
    machine.setattr(instance, "x", Value::Int(1)).unwrap();
    let weak = machine.new_weak_proxy(instance).unwrap();

    assert_eq!(machine.getattr(weak, "x").unwrap(), Value::Int(1));
    machine.setattr(weak, "x", Value::Int(2)).unwrap();
    assert_eq!(machine.getattr(instance, "x").unwrap(), Value::Int(2));

    machine.release(instance);
    let err = machine.setattr(weak, "x", Value::Int(3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetExpired);
}
