use std::cell::{Cell, RefCell};
use std::rc::Rc;

use twine_eval::{all, is_thenable, run, Callback, Error, Result, Thenable, ThenableValue, Value};

/// A foreign thenable that fulfills as soon as someone subscribes.
struct Immediate(i64);

impl Thenable for Immediate {
    fn subscribe(&self, on_fulfilled: Callback<Value>, _on_rejected: Callback<Error>) -> Result<()> {
        on_fulfilled(Value::from(self.0));
        Ok(())
    }
}

/// A foreign thenable that reports both outcomes, twice.
struct Unruly;

impl Thenable for Unruly {
    fn subscribe(&self, on_fulfilled: Callback<Value>, on_rejected: Callback<Error>) -> Result<()> {
        on_fulfilled(Value::from("first"));
        on_rejected(Error::exception("second"));
        Ok(())
    }
}

/// A foreign thenable that fulfills and then reports a subscription error.
struct FulfillThenErr;

impl Thenable for FulfillThenErr {
    fn subscribe(&self, on_fulfilled: Callback<Value>, _on_rejected: Callback<Error>) -> Result<()> {
        on_fulfilled(Value::from(1));
        Err(Error::exception("late throw"))
    }
}

/// A foreign thenable whose subscription always fails.
struct Broken;

impl Thenable for Broken {
    fn subscribe(&self, _on_fulfilled: Callback<Value>, _on_rejected: Callback<Error>) -> Result<()> {
        Err(Error::exception("cannot subscribe"))
    }
}

fn foreign(thenable: impl Thenable + 'static) -> Value {
    Value::Thenable(Rc::new(thenable))
}

#[test]
fn test_then_runs_before_returning() {
    let seen = Rc::new(Cell::new(None));
    let sink = Rc::clone(&seen);
    let _ = ThenableValue::resolve(4).then(move |v| {
        sink.set(v.as_f64());
        Ok(v)
    });
    assert_eq!(seen.get(), Some(4.0));
}

#[test]
fn test_catch_runs_before_returning() {
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    let recovered = ThenableValue::reject(Error::exception("boom")).catch(move |e| {
        *sink.borrow_mut() = Some(e);
        Ok(Value::from("fine"))
    });
    assert_eq!(*seen.borrow(), Some(Error::exception("boom")));
    assert_eq!(recovered.settlement(), Some(Ok(Value::from("fine"))));
}

#[test]
fn test_double_settlement_is_ignored() {
    let value = ThenableValue::new(|resolver| {
        resolver.resolve(1);
        resolver.reject(Error::exception("late"));
        Ok(())
    });
    let rejected = Rc::new(Cell::new(false));
    let flag = Rc::clone(&rejected);
    let derived = value.then_or(Ok, move |e| {
        flag.set(true);
        Err(e)
    });
    assert_eq!(derived.settlement(), Some(Ok(Value::from(1))));
    assert!(!rejected.get());
}

#[test]
fn test_executor_error_after_settling_is_ignored() {
    let value = ThenableValue::new(|resolver| {
        resolver.resolve("kept");
        Err(Error::exception("ignored"))
    });
    assert_eq!(value.settlement(), Some(Ok(Value::from("kept"))));
}

#[test]
fn test_executor_error_rejects() {
    let value = ThenableValue::new(|_| Err(Error::exception("thrown")));
    assert_eq!(value.settlement(), Some(Err(Error::exception("thrown"))));
}

#[test]
fn test_run_empty_never_calls_step() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let done = run(Vec::<Value>::new(), move |_, _| {
        counter.set(counter.get() + 1);
        Ok(Value::Null)
    });
    assert_eq!(done.settlement(), Some(Ok(Value::Null)));
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_run_waits_for_pending_step() {
    let (pending, resolver) = ThenableValue::deferred();
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let done = run(["a", "b", "c"], move |item, index| {
        sink.borrow_mut().push((item, index));
        if item == "c" {
            Ok(pending.clone().into())
        } else {
            Ok(Value::from(item))
        }
    });

    assert_eq!(*log.borrow(), [("a", 0), ("b", 1), ("c", 2)]);
    assert!(done.is_pending());

    resolver.resolve("done");
    assert_eq!(done.settlement(), Some(Ok(Value::Null)));
}

#[test]
fn test_run_stops_at_first_failure() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let done = run(1..=5, move |n, _| {
        sink.borrow_mut().push(n);
        if n == 2 {
            Ok(ThenableValue::reject(Error::exception(n)).into())
        } else {
            Ok(Value::from(n))
        }
    });
    assert_eq!(done.settlement(), Some(Err(Error::exception(2))));
    assert_eq!(*log.borrow(), [1, 2]);
}

#[test]
fn test_run_ignores_subscribe_error_after_fulfillment() {
    let (pending, resolver) = ThenableValue::deferred();
    let done = run(0..2, move |i, _| {
        if i == 0 {
            Ok(foreign(FulfillThenErr))
        } else {
            Ok(pending.clone().into())
        }
    });
    assert!(done.is_pending());
    resolver.resolve("later");
    assert_eq!(done.settlement(), Some(Ok(Value::Null)));
}

#[test]
fn test_run_subscribe_error_rejects() {
    let done = run(0..3, |_, _| Ok(foreign(Broken)));
    assert_eq!(done.settlement(), Some(Err(Error::exception("cannot subscribe"))));
}

#[test]
fn test_run_with_immediate_foreign_steps_does_not_recurse() {
    let done = run(0..200_000, |_, _| Ok(foreign(Immediate(1))));
    assert_eq!(done.settlement(), Some(Ok(Value::Null)));
}

#[test]
fn test_all_preserves_order() {
    let collected = all([Value::from(1), ThenableValue::resolve(2).into(), Value::from(3)]);
    assert_eq!(
        collected.settlement(),
        Some(Ok(Value::Array(vec![1.into(), 2.into(), 3.into()])))
    );
}

#[test]
fn test_all_waits_for_late_entries() {
    let (late, resolver) = ThenableValue::deferred();
    let collected = all([late.into(), Value::from("b")]);
    assert!(collected.is_pending());
    resolver.resolve("a");
    assert_eq!(
        collected.settlement(),
        Some(Ok(Value::Array(vec!["a".into(), "b".into()])))
    );
}

#[test]
fn test_all_fails_fast() {
    let produced = Rc::new(Cell::new(0));
    let counter = Rc::clone(&produced);
    let items = (0..3).map(move |i| -> Value {
        counter.set(counter.get() + 1);
        match i {
            1 => ThenableValue::reject(Error::exception("x")).into(),
            n => Value::from(n),
        }
    });
    let collected = all(items);
    assert_eq!(collected.settlement(), Some(Err(Error::exception("x"))));
    assert_eq!(produced.get(), 2);
}

#[test]
fn test_chaining() {
    let result = ThenableValue::resolve(1)
        .then(|v| Ok(Value::from(v.to_number() + 1.0)))
        .then(|v| Ok(Value::from(v.to_number() * 2.0)));
    assert_eq!(result.settlement(), Some(Ok(Value::from(6))));
}

#[test]
fn test_handler_error_rejects_only_derived_value() {
    let parent = ThenableValue::resolve(1);
    let derived = parent.then(|_| Err(Error::exception("handler failed")));
    assert_eq!(parent.settlement(), Some(Ok(Value::from(1))));
    assert_eq!(derived.settlement(), Some(Err(Error::exception("handler failed"))));
}

#[test]
fn test_then_passes_rejection_through() {
    let called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&called);
    let derived = ThenableValue::reject(Error::exception("x")).then(move |v| {
        flag.set(true);
        Ok(v)
    });
    assert_eq!(derived.settlement(), Some(Err(Error::exception("x"))));
    assert!(!called.get());
}

#[test]
fn test_catch_passes_fulfillment_through() {
    let called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&called);
    let derived = ThenableValue::resolve("ok").catch(move |e| {
        flag.set(true);
        Err(e)
    });
    assert_eq!(derived.settlement(), Some(Ok(Value::from("ok"))));
    assert!(!called.get());
}

#[test]
fn test_handler_returning_thenable_is_adopted() {
    let (inner, resolver) = ThenableValue::deferred();
    let adopted = ThenableValue::resolve(0).then(move |_| Ok(inner.into()));
    assert!(adopted.is_pending());
    resolver.resolve("inner");
    assert_eq!(adopted.settlement(), Some(Ok(Value::from("inner"))));
}

#[test]
fn test_foreign_thenable_is_adopted() {
    let value = ThenableValue::resolve(foreign(Immediate(5)));
    assert_eq!(value.settlement(), Some(Ok(Value::from(5))));
}

#[test]
fn test_foreign_thenable_first_callback_wins() {
    let value = ThenableValue::resolve(foreign(Unruly));
    assert_eq!(value.settlement(), Some(Ok(Value::from("first"))));
}

#[test]
fn test_self_adoption_rejects() {
    let (value, resolver) = ThenableValue::deferred();
    resolver.resolve(value.clone());
    assert!(matches!(value.settlement(), Some(Err(Error::Type(_)))));
}

#[test]
fn test_is_thenable() {
    assert!(is_thenable(&ThenableValue::resolve(1).into()));
    assert!(is_thenable(&foreign(Immediate(1))));
    assert!(!is_thenable(&Value::from("then")));
}
