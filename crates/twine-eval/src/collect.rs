//! Collect mixed plain and deferred values into one array.

use std::cell::RefCell;
use std::rc::Rc;

use crate::sequence::run;
use crate::thenable::ThenableValue;
use crate::value::Value;

/// Fulfills with an array holding each input's final value, in input order.
///
/// Inputs are awaited one at a time through [`run`], so the first rejection
/// wins and later inputs are never pulled from the iterator.
pub fn all<I>(items: I) -> ThenableValue
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: 'static,
{
    let results = Rc::new(RefCell::new(Vec::new()));
    let slots = Rc::clone(&results);
    run(items, move |item, index| match item {
        Value::Thenable(_) => {
            let slots = Rc::clone(&slots);
            let stored = ThenableValue::resolve(item).then(move |value| {
                store(&slots, index, value);
                Ok(Value::Null)
            });
            Ok(stored.into())
        }
        plain => {
            store(&slots, index, plain);
            Ok(Value::Null)
        }
    })
    .then(move |_| Ok(Value::Array(results.take())))
}

fn store(slots: &RefCell<Vec<Value>>, index: usize, value: Value) {
    let mut slots = slots.borrow_mut();
    if slots.len() <= index {
        slots.resize(index + 1, Value::Null);
    }
    slots[index] = value;
}
