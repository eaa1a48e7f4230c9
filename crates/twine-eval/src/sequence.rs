//! Ordered, fail-fast iteration over steps that may settle later.

use std::cell::{Cell, RefCell};
use std::iter::Enumerate;
use std::rc::Rc;

use crate::thenable::{Resolver, ThenableValue};
use crate::value::Value;
use crate::Result;

/// Calls `step(item, index)` for each item, strictly left to right.
///
/// A plain result moves on to the next item at once; a thenable result is
/// awaited first. The returned value fulfills with `Value::Null` after the
/// last step settles, or rejects with the first failure as soon as it
/// happens. No step runs after a failure and the iterator is not advanced
/// past the failing item.
pub fn run<I, F>(items: I, step: F) -> ThenableValue
where
    I: IntoIterator,
    I::IntoIter: 'static,
    F: FnMut(I::Item, usize) -> Result<Value> + 'static,
{
    let (done, resolver) = ThenableValue::deferred();
    let task = Rc::new(SequenceTask {
        cursor: RefCell::new(items.into_iter().enumerate()),
        step: RefCell::new(step),
        resolver,
    });
    task.advance();
    done
}

struct SequenceTask<I, F> {
    cursor: RefCell<Enumerate<I>>,
    step: RefCell<F>,
    resolver: Resolver,
}

impl<I, F> SequenceTask<I, F>
where
    I: Iterator + 'static,
    F: FnMut(I::Item, usize) -> Result<Value> + 'static,
{
    fn advance(self: Rc<Self>) {
        while let Some(result) = self.next_result() {
            if !Rc::clone(&self).finish_step(result) {
                return;
            }
        }
    }

    /// Runs the next step, or resolves the task when none are left.
    fn next_result(&self) -> Option<Result<Value>> {
        let next = self.cursor.borrow_mut().next();
        match next {
            Some((index, item)) => Some((self.step.borrow_mut())(item, index)),
            None => {
                self.resolver.resolve(Value::Null);
                None
            }
        }
    }

    /// Returns true when the step completed in place and iteration may go on.
    fn finish_step(self: Rc<Self>, result: Result<Value>) -> bool {
        let thenable = match result {
            Err(reason) => {
                self.resolver.reject(reason);
                return false;
            }
            Ok(Value::Thenable(thenable)) => thenable,
            Ok(_) => return true,
        };

        if let Some(outcome) = thenable.as_native().and_then(ThenableValue::settlement) {
            return self.finish_step(outcome);
        }

        let subscription = Rc::new(Subscription::default());
        let (on_value_task, on_value_sub) = (Rc::clone(&self), Rc::clone(&subscription));
        let (on_reason_task, on_reason_sub) = (Rc::clone(&self), Rc::clone(&subscription));
        let subscribed = thenable.subscribe(
            Box::new(move |value| on_value_task.deliver(&on_value_sub, Ok(value))),
            Box::new(move |reason| on_reason_task.deliver(&on_reason_sub, Err(reason))),
        );
        subscription.returned.set(true);

        if let Some(outcome) = subscription.inline.take() {
            return self.finish_step(outcome);
        }
        if let Err(reason) = subscribed {
            if !subscription.claimed.replace(true) {
                self.resolver.reject(reason);
            }
        }
        false
    }

    /// Handles a foreign callback. Outcomes delivered while `subscribe` is
    /// still running are parked for `finish_step` so the loop in `advance`
    /// picks up the next step instead of recursing.
    fn deliver(self: Rc<Self>, subscription: &Subscription, outcome: Result<Value>) {
        if subscription.claimed.replace(true) {
            return;
        }
        if !subscription.returned.get() {
            *subscription.inline.borrow_mut() = Some(outcome);
            return;
        }
        if Rc::clone(&self).finish_step(outcome) {
            self.advance();
        }
    }
}

/// One subscription to a foreign step result. Only the first outcome counts,
/// whether it arrives through a callback or as an `Err` from `subscribe`.
#[derive(Default)]
struct Subscription {
    claimed: Cell<bool>,
    returned: Cell<bool>,
    inline: RefCell<Option<Result<Value>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_empty_resolves_without_steps() {
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
    fn test_long_synchronous_sequence_does_not_recurse() {
        let done = run(0..100_000, |_, _| Ok(ThenableValue::resolve(1).into()));
        assert_eq!(done.settlement(), Some(Ok(Value::Null)));
    }

    #[test]
    fn test_step_error_rejects() {
        let done = run(0..3, |i, _| {
            if i == 1 {
                Err(Error::exception("boom"))
            } else {
                Ok(Value::Null)
            }
        });
        assert_eq!(done.settlement(), Some(Err(Error::exception("boom"))));
    }
}
