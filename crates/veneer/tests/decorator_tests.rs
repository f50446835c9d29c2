use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use veneer::{
    BinOp, CallArgs, ErrorKind, Machine, ResourceLimits, Value, decorator,
};

#[test]
fn one_decorator_wraps_many_callables() {
    let mut machine = Machine::new();
    let double = machine
        .function("double", |machine, args| {
            let x = args.get_one("double")?;
            machine.binary(x, BinOp::Mul, Value::Int(2))
        })
        .unwrap();
    let negate = machine
        .function("negate", |machine, args| {
            let x = args.get_one("negate")?;
            machine.binary(Value::Int(0), BinOp::Sub, x)
        })
        .unwrap();

    let counting = {
        let calls = Rc::new(RefCell::new(0));
        let calls_in = Rc::clone(&calls);
        (
            decorator(move |machine, wrapped, _instance, args| {
                *calls_in.borrow_mut() += 1;
                machine.call(wrapped, args)
            }),
            calls,
        )
    };
    let (counting, calls) = counting;

    let wrapped_double = counting.apply(&mut machine, double).unwrap();
    let wrapped_negate = counting.apply(&mut machine, negate).unwrap();

    // Both wrappers share the decoration's interception function.
    let a = machine.wrapper_info(wrapped_double).unwrap();
    let b = machine.wrapper_info(wrapped_negate).unwrap();
    assert!(Rc::ptr_eq(&a.wrapper, &b.wrapper));

    assert_eq!(
        machine.call(wrapped_double, CallArgs::one(Value::Int(4))).unwrap(),
        Value::Int(8)
    );
    assert_eq!(
        machine.call(wrapped_negate, CallArgs::one(Value::Int(4))).unwrap(),
        Value::Int(-4)
    );
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn interception_may_adapt_arguments_and_results() {
    let mut machine = Machine::new();
    let add = machine
        .function("add", |machine, args| {
            let (a, b) = args.get_two("add")?;
            machine.binary(a, BinOp::Add, b)
        })
        .unwrap();

    let plus_one = decorator(|machine, wrapped, _instance, args| {
        let result = machine.call(wrapped, args)?;
        machine.binary(result, BinOp::Add, Value::Int(1))
    });
    let wrapper = plus_one.apply(&mut machine, add).unwrap();

    let result = machine
        .call(wrapper, CallArgs::two(Value::Int(2), Value::Int(3)))
        .unwrap();
    assert_eq!(result, Value::Int(6));
}

#[test]
fn interception_may_skip_the_wrapped_callable() {
    let mut machine = Machine::new();
    let add = machine
        .function("add", |machine, args| {
            let (a, b) = args.get_two("add")?;
            machine.binary(a, BinOp::Add, b)
        })
        .unwrap();

    let short_circuit = decorator(|_machine, _wrapped, _instance, _args| Ok(Value::Int(0)));
    let wrapper = short_circuit.apply(&mut machine, add).unwrap();

    let result = machine
        .call(wrapper, CallArgs::two(Value::Int(2), Value::Int(3)))
        .unwrap();
    assert_eq!(result, Value::Int(0));
}

#[test]
fn keyword_arguments_pass_through() {
    let mut machine = Machine::new();
    let pick = machine
        .function("pick", |_, args| {
            Ok(args.kwarg("wanted").unwrap_or(Value::None))
        })
        .unwrap();

    let passthrough = decorator(|machine, wrapped, _instance, args| machine.call(wrapped, args));
    let wrapper = passthrough.apply(&mut machine, pick).unwrap();

    let args = CallArgs::none().keyword("wanted", Value::Int(9));
    assert_eq!(machine.call(wrapper, args).unwrap(), Value::Int(9));
}

#[test]
fn wrapped_errors_surface_unchanged() {
    let mut machine = Machine::new();
    let fail = machine
        .function("fail", |_, _| Err(ErrorKind::ValueError.msg("bad input")))
        .unwrap();

    let passthrough = decorator(|machine, wrapped, _instance, args| machine.call(wrapped, args));
    let wrapper = passthrough.apply(&mut machine, fail).unwrap();

    let err = machine.call(wrapper, CallArgs::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueError);
    assert_eq!(err.message(), "bad input");
}

#[test]
fn runaway_wrapper_recursion_hits_the_depth_limit() {
    let mut machine = Machine::with_limits(ResourceLimits {
        max_call_depth: 16,
        ..ResourceLimits::default()
    });

    let slot: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let slot_in = Rc::clone(&slot);
    let reenter = machine
        .function("reenter", move |machine, _args| {
            let wrapper = slot_in.borrow().unwrap();
            machine.call(wrapper, CallArgs::none())
        })
        .unwrap();

    let passthrough = decorator(|machine, wrapped, _instance, args| machine.call(wrapped, args));
    let wrapper = passthrough.apply(&mut machine, reenter).unwrap();
    *slot.borrow_mut() = Some(wrapper);

    let err = machine.call(wrapper, CallArgs::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionError);
}

#[test]
fn object_limit_applies_to_wrapper_derivation() {
    let mut machine = Machine::with_limits(ResourceLimits {
        max_objects: Some(8),
        ..ResourceLimits::default()
    });
    let noop = machine.function("noop", |_, _| Ok(Value::None)).unwrap();
    let passthrough = decorator(|machine, wrapped, _instance, args| machine.call(wrapped, args));
    let wrapper = passthrough.apply(&mut machine, noop).unwrap();

    let class = machine.new_class("C").unwrap();
    machine.set_class_attr(class, "m", wrapper).unwrap();
    let instance = machine.call(class, CallArgs::none()).unwrap();

    // Each access allocates a bound method plus a derived wrapper; the limit
    // eventually trips with a MemoryError rather than growing unbounded.
    let mut last = Ok(Value::None);
    for _ in 0..8 {
        last = machine.getattr(instance, "m");
        if last.is_err() {
            break;
        }
    }
    assert_eq!(last.unwrap_err().kind(), ErrorKind::MemoryError);
}
