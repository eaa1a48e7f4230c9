//! Glue between thenables and tokio's single-threaded runtime.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Error;
use crate::thenable::{Callback, Thenable, ThenableValue};
use crate::value::Value;
use crate::Result;

#[derive(Default)]
struct Slot {
    outcome: Option<Result<Value>>,
    waker: Option<Waker>,
}

fn fill(slot: &RefCell<Slot>, outcome: Result<Value>) {
    let waker = {
        let mut slot = slot.borrow_mut();
        slot.outcome = Some(outcome);
        slot.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
}

/// Future returned by awaiting a [`ThenableValue`].
pub struct Settled {
    slot: Rc<RefCell<Slot>>,
}

impl Future for Settled {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl IntoFuture for ThenableValue {
    type Output = Result<Value>;
    type IntoFuture = Settled;

    fn into_future(self) -> Settled {
        let slot = Rc::new(RefCell::new(Slot::default()));
        let fulfilled = Rc::clone(&slot);
        let rejected = Rc::clone(&slot);
        let subscribed = self.subscribe(
            Box::new(move |value| fill(&fulfilled, Ok(value))),
            Box::new(move |reason| fill(&rejected, Err(reason))),
        );
        if let Err(reason) = subscribed {
            fill(&slot, Err(reason));
        }
        Settled { slot }
    }
}

/// A thenable backed by a task on the current [`tokio::task::LocalSet`].
///
/// Its callbacks run from the task once the future completes, so values
/// built from it settle only while the local set is being driven.
pub struct TaskThenable {
    settled: ThenableValue,
}

impl TaskThenable {
    /// Spawns `future` onto the current local set.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a `LocalSet`, like
    /// [`tokio::task::spawn_local`].
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + 'static,
    {
        let (settled, resolver) = ThenableValue::deferred();
        tokio::task::spawn_local(async move {
            let outcome = future.await;
            if let Err(reason) = &outcome {
                tracing::trace!(%reason, "task thenable rejected");
            }
            resolver.settle(outcome);
        });
        Self { settled }
    }

    /// A task that sleeps for `delay` and then fulfills with `value`.
    pub fn delay(delay: std::time::Duration, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        })
    }

    /// A task that yields once to the scheduler and then settles with `outcome`.
    pub fn yield_then(outcome: Result<Value>) -> Self {
        Self::spawn(async move {
            tokio::task::yield_now().await;
            outcome
        })
    }
}

impl Thenable for TaskThenable {
    fn subscribe(&self, on_fulfilled: Callback<Value>, on_rejected: Callback<Error>) -> Result<()> {
        self.settled.subscribe(on_fulfilled, on_rejected)
    }
}

impl From<TaskThenable> for Value {
    fn from(task: TaskThenable) -> Self {
        Value::Thenable(Rc::new(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn test_await_settled_value() {
        assert_eq!(ThenableValue::resolve(7).await, Ok(Value::from(7)));
    }

    #[tokio::test]
    async fn test_await_rejection() {
        let rejected = ThenableValue::reject(Error::exception("no"));
        assert_eq!(rejected.await, Err(Error::exception("no")));
    }

    #[tokio::test]
    async fn test_task_thenable_is_adopted() {
        LocalSet::new()
            .run_until(async {
                let adopted = ThenableValue::resolve(TaskThenable::yield_then(Ok(Value::from(5))));
                assert!(adopted.is_pending());
                assert_eq!(adopted.await, Ok(Value::from(5)));
            })
            .await;
    }
}
