use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use veneer::{
    BoundType, CallArgs, DecoratorBuilder, ErrorKind, Kind, Machine, RecordingTracer, TraceEvent,
    Value, decorator,
};

fn passthrough() -> DecoratorBuilder {
    decorator(|machine, wrapped, _instance, args| machine.call(wrapped, args))
}

fn add_function(machine: &mut Machine) -> Value {
    machine
        .function("add", |machine, args| {
            let (a, b) = args.get_two("add")?;
            machine.binary(a, veneer::BinOp::Add, b)
        })
        .unwrap()
}

#[test]
fn wrapping_a_free_function() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);
    let wrapper = passthrough().apply(&mut machine, func).unwrap();

    assert_eq!(machine.kind_of(wrapper).unwrap(), Kind::Wrapper);
    assert_eq!(machine.getattr(wrapper, "__wrapped__").unwrap(), func);

    let info = machine.wrapper_info(wrapper).unwrap();
    assert_eq!(info.bound_type, BoundType::Function);
    assert!(info.instance.is_none());
    assert!(info.parent.is_none());

    let result = machine
        .call(wrapper, CallArgs::two(Value::Int(2), Value::Int(3)))
        .unwrap();
    assert_eq!(result, Value::Int(5));
}

#[test]
fn wrapper_forwards_target_attributes() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);
    let wrapper = passthrough().apply(&mut machine, func).unwrap();

    let name = machine.getattr(wrapper, "__name__").unwrap();
    assert_eq!(machine.str_of(name).unwrap(), "add");
}

#[test]
fn wrapper_extension_namespace_and_binding_attributes() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);
    let wrapper = passthrough().apply(&mut machine, func).unwrap();

    machine.setattr(wrapper, "_self_marker", Value::Int(7)).unwrap();
    assert_eq!(machine.getattr(wrapper, "_self_marker").unwrap(), Value::Int(7));

    let bound_type = machine.getattr(wrapper, "_self_bound_type").unwrap();
    assert_eq!(machine.str_of(bound_type).unwrap(), "function");
    assert_eq!(machine.getattr(wrapper, "_self_instance").unwrap(), Value::None);
    assert_eq!(machine.getattr(wrapper, "_self_parent").unwrap(), Value::None);

    // The wrapper function is a host closure, reached through `wrapper_info`
    // rather than the attribute surface.
    let err = machine.getattr(wrapper, "_self_wrapper").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AttributeError);
    let again = passthrough().apply(&mut machine, func).unwrap();
    let info = machine.wrapper_info(wrapper).unwrap();
    let other = machine.wrapper_info(again).unwrap();
    assert!(!Rc::ptr_eq(&info.wrapper, &other.wrapper));
}

#[test]
fn member_access_derives_a_bound_wrapper() {
    let mut machine = Machine::new();
    let get_x = machine
        .function("get_x", |machine, args| {
            let slf = args.args()[0];
            machine.getattr(slf, "x")
        })
        .unwrap();
    let wrapper = passthrough().apply(&mut machine, get_x).unwrap();

    let class = machine.new_class("Point").unwrap();
    machine.set_class_attr(class, "get_x", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();
    machine.setattr(instance, "x", Value::Int(11)).unwrap();

    let method = machine.getattr(instance, "get_x").unwrap();
    assert_eq!(machine.kind_of(method).unwrap(), Kind::BoundWrapper);

    let info = machine.wrapper_info(method).unwrap();
    assert_eq!(info.bound_type, BoundType::BoundMethod);
    assert_eq!(
        machine.identity(info.instance).unwrap(),
        machine.identity(instance).unwrap()
    );
    let parent = info.parent.unwrap();
    assert_eq!(
        machine.identity(parent).unwrap(),
        machine.identity(wrapper).unwrap()
    );

    let bound_type = machine.getattr(method, "_self_bound_type").unwrap();
    assert_eq!(machine.str_of(bound_type).unwrap(), "instancemethod");

    assert_eq!(machine.call(method, CallArgs::none()).unwrap(), Value::Int(11));
}

#[test]
fn each_access_derives_a_fresh_wrapper() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);
    let wrapper = passthrough().apply(&mut machine, func).unwrap();

    let class = machine.new_class("C").unwrap();
    machine.set_class_attr(class, "m", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();

    let first = machine.getattr(instance, "m").unwrap();
    let second = machine.getattr(instance, "m").unwrap();
    assert_ne!(
        machine.identity(first).unwrap(),
        machine.identity(second).unwrap()
    );
    // Both report the same decoration.
    assert_eq!(
        machine.identity(machine.wrapper_info(first).unwrap().parent.unwrap()).unwrap(),
        machine.identity(machine.wrapper_info(second).unwrap().parent.unwrap()).unwrap()
    );
}

#[test]
fn class_access_keeps_function_binding() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);
    let wrapper = passthrough().apply(&mut machine, func).unwrap();

    let class = machine.new_class("C").unwrap();
    machine.set_class_attr(class, "m", wrapper).unwrap();

    let via_class = machine.getattr(class, "m").unwrap();
    let info = machine.wrapper_info(via_class).unwrap();
    assert_eq!(info.bound_type, BoundType::Function);
    assert!(info.instance.is_none());
    assert!(info.parent.is_some());

    let result = machine
        .call(via_class, CallArgs::two(Value::Int(1), Value::Int(2)))
        .unwrap();
    assert_eq!(result, Value::Int(3));
}

#[test]
fn classmethod_binding() {
    let mut machine = Machine::new();
    let name_of = machine
        .function("name_of", |machine, args| {
            let cls = args.args()[0];
            machine.getattr(cls, "__name__")
        })
        .unwrap();
    let marker = machine.classmethod(name_of).unwrap();
    let wrapper = passthrough().apply(&mut machine, marker).unwrap();

    let info = machine.wrapper_info(wrapper).unwrap();
    assert_eq!(info.bound_type, BoundType::ClassMethod);

    let class = machine.new_class("Named").unwrap();
    machine.set_class_attr(class, "name_of", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();

    let method = machine.getattr(instance, "name_of").unwrap();
    let info = machine.wrapper_info(method).unwrap();
    assert_eq!(info.bound_type, BoundType::ClassMethod);
    assert_eq!(
        machine.identity(info.instance).unwrap(),
        machine.identity(class).unwrap()
    );

    let name = machine.call(method, CallArgs::none()).unwrap();
    assert_eq!(machine.str_of(name).unwrap(), "Named");

    // Access through the class binds identically.
    let via_class = machine.getattr(class, "name_of").unwrap();
    let name = machine.call(via_class, CallArgs::none()).unwrap();
    assert_eq!(machine.str_of(name).unwrap(), "Named");
}

#[test]
fn staticmethod_binding() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);
    let marker = machine.staticmethod(func).unwrap();
    let wrapper = passthrough().apply(&mut machine, marker).unwrap();

    let info = machine.wrapper_info(wrapper).unwrap();
    assert_eq!(info.bound_type, BoundType::StaticMethod);

    let class = machine.new_class("C").unwrap();
    machine.set_class_attr(class, "add", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();

    let method = machine.getattr(instance, "add").unwrap();
    let info = machine.wrapper_info(method).unwrap();
    assert_eq!(info.bound_type, BoundType::StaticMethod);
    assert!(info.instance.is_none());

    // No implicit first argument is injected.
    let result = machine
        .call(method, CallArgs::two(Value::Int(2), Value::Int(3)))
        .unwrap();
    assert_eq!(result, Value::Int(5));
}

#[test]
fn decorating_an_already_bound_method() {
    let mut machine = Machine::new();
    let get_x = machine
        .function("get_x", |machine, args| {
            let slf = args.args()[0];
            machine.getattr(slf, "x")
        })
        .unwrap();
    let class = machine.new_class("Point").unwrap();
    machine.set_class_attr(class, "get_x", get_x).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();
    machine.setattr(instance, "x", Value::Int(3)).unwrap();

    let bound = machine.getattr(instance, "get_x").unwrap();
    assert_eq!(machine.kind_of(bound).unwrap(), Kind::BoundMethod);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_in = Rc::clone(&seen);
    let observing = decorator(move |machine, wrapped, instance, args| {
        seen_in.borrow_mut().push(machine.identity(instance)?);
        machine.call(wrapped, args)
    });
    let wrapper = observing.apply(&mut machine, bound).unwrap();

    let info = machine.wrapper_info(wrapper).unwrap();
    assert_eq!(info.bound_type, BoundType::BoundMethod);

    assert_eq!(machine.call(wrapper, CallArgs::none()).unwrap(), Value::Int(3));
    let expected = machine.identity(instance).unwrap();
    assert_eq!(*seen.borrow(), vec![expected]);
}

#[test]
fn wrapper_interception_receives_the_instance() {
    let mut machine = Machine::new();
    let get_x = machine
        .function("get_x", |machine, args| {
            let slf = args.args()[0];
            machine.getattr(slf, "x")
        })
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_in = Rc::clone(&seen);
    let observing = decorator(move |machine, wrapped, instance, args| {
        seen_in.borrow_mut().push(machine.identity(instance)?);
        machine.call(wrapped, args)
    });
    let wrapper = observing.apply(&mut machine, get_x).unwrap();

    let class = machine.new_class("Point").unwrap();
    machine.set_class_attr(class, "get_x", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();
    machine.setattr(instance, "x", Value::Int(4)).unwrap();

    let result = machine
        .call_method(instance, "get_x", CallArgs::none())
        .unwrap();
    assert_eq!(result, Value::Int(4));
    let expected = machine.identity(instance).unwrap();
    assert_eq!(*seen.borrow(), vec![expected]);
}

#[test]
fn stacked_decorators_run_outermost_first() {
    let mut machine = Machine::new();
    let func = add_function(&mut machine);

    let order = Rc::new(RefCell::new(Vec::new()));
    let order_a = Rc::clone(&order);
    let order_b = Rc::clone(&order);
    let outer = decorator(move |machine, wrapped, _instance, args| {
        order_a.borrow_mut().push("outer");
        machine.call(wrapped, args)
    });
    let inner = decorator(move |machine, wrapped, _instance, args| {
        order_b.borrow_mut().push("inner");
        machine.call(wrapped, args)
    });

    let once = inner.apply(&mut machine, func).unwrap();
    let twice = outer.apply(&mut machine, once).unwrap();

    let result = machine
        .call(twice, CallArgs::two(Value::Int(2), Value::Int(3)))
        .unwrap();
    assert_eq!(result, Value::Int(5));
    assert_eq!(*order.borrow(), vec!["outer", "inner"]);

    // Unwrapping peels exactly one layer per step back to the bare function.
    let peeled = machine.unwrap(twice).unwrap();
    assert_eq!(peeled, once);
    assert_eq!(machine.unwrap(peeled).unwrap(), func);
    assert_eq!(machine.getattr(twice, "__wrapped__").unwrap(), once);
    let inner_wrapped = machine.getattr(once, "__wrapped__").unwrap();
    assert_eq!(inner_wrapped, func);
    assert_eq!(machine.kind_of(inner_wrapped).unwrap(), Kind::Function);
}

#[test]
fn stacked_decorators_bind_through_member_access() {
    let mut machine = Machine::new();
    let get_x = machine
        .function("get_x", |machine, args| {
            let slf = args.args()[0];
            machine.getattr(slf, "x")
        })
        .unwrap();
    let once = passthrough().apply(&mut machine, get_x).unwrap();
    let twice = passthrough().apply(&mut machine, once).unwrap();

    let class = machine.new_class("Point").unwrap();
    machine.set_class_attr(class, "get_x", twice).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();
    machine.setattr(instance, "x", Value::Int(8)).unwrap();

    let method = machine.getattr(instance, "get_x").unwrap();
    let info = machine.wrapper_info(method).unwrap();
    assert_eq!(info.bound_type, BoundType::BoundMethod);

    assert_eq!(machine.call(method, CallArgs::none()).unwrap(), Value::Int(8));
}

#[test]
fn binding_inference_fails_at_decoration_time() {
    let mut machine = Machine::new();
    let err = passthrough().apply(&mut machine, Value::Int(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindingInference);

    let list = machine.list_value(vec![]).unwrap();
    let err = passthrough().apply(&mut machine, list).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindingInference);
}

#[test]
fn wrapper_over_uncallable_target_fails_at_call_time() {
    let mut machine = Machine::new();
    // A classmethod marker passes decoration-time inference even when its
    // payload is not callable; the failure surfaces on invocation.
    let marker = machine.classmethod(Value::Int(1)).unwrap();
    let wrapper = passthrough().apply(&mut machine, marker).unwrap();

    let err = machine.call(wrapper, CallArgs::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("not callable"), "{err}");
}

#[test]
fn decorating_a_class_wraps_construction() {
    let mut machine = Machine::new();
    let class = machine.new_class("Widget").unwrap();

    let calls = Rc::new(RefCell::new(0));
    let calls_in = Rc::clone(&calls);
    let counting = decorator(move |machine, wrapped, _instance, args| {
        *calls_in.borrow_mut() += 1;
        machine.call(wrapped, args)
    });
    let wrapper = counting.apply(&mut machine, class).unwrap();

    let info = machine.wrapper_info(wrapper).unwrap();
    assert_eq!(info.bound_type, BoundType::Function);

    let instance = machine.call(wrapper, CallArgs::none()).unwrap();
    assert!(machine.is_instance(instance, class).unwrap());
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn tracer_observes_derivation_and_interception() {
    let mut machine = Machine::new();
    let tracer = RecordingTracer::new();
    let events = tracer.events();
    machine.set_tracer(Box::new(tracer));

    let get_x = machine
        .function("get_x", |machine, args| {
            let slf = args.args()[0];
            machine.getattr(slf, "x")
        })
        .unwrap();
    let wrapper = passthrough().apply(&mut machine, get_x).unwrap();
    let class = machine.new_class("Point").unwrap();
    machine.set_class_attr(class, "get_x", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();
    machine.setattr(instance, "x", Value::Int(1)).unwrap();

    events.borrow_mut().clear();
    let result = machine
        .call_method(instance, "get_x", CallArgs::none())
        .unwrap();
    assert_eq!(result, Value::Int(1));

    let recorded = events.borrow().clone();
    assert_eq!(
        recorded,
        vec![
            TraceEvent::Derive { bound_type: BoundType::BoundMethod },
            TraceEvent::WrapperCall { bound_type: BoundType::BoundMethod },
            TraceEvent::Call { name: "get_x".to_owned() },
        ]
    );
}
