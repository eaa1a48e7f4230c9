//! A promise-like value with a synchronous fast path.
//!
//! [`ThenableValue`] settles exactly once and runs handlers in attachment
//! order. Nothing is ever queued on a scheduler: when a value is already
//! settled, `then` runs the handler before returning, and when a pending value
//! settles, every queued handler runs inside that same call. The only way
//! deferral enters is through a foreign [`Thenable`] whose own implementation
//! decides when to call back.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::value::Value;
use crate::Result;

/// A one-shot continuation.
pub type Callback<T> = Box<dyn FnOnce(T)>;

/// Handler run when a value fulfills. Returning `Err` rejects the derived value.
pub type OnFulfilled = Box<dyn FnOnce(Value) -> Result<Value>>;

/// Handler run when a value rejects. Returning `Ok` recovers the derived value.
pub type OnRejected = Box<dyn FnOnce(Error) -> Result<Value>>;

/// Anything exposing a `then` hook.
///
/// Implementations call at most one of the two callbacks, at a time of their
/// choosing. Callers guard against implementations that misbehave, so calling
/// both or calling late is harmless.
pub trait Thenable {
    /// Registers continuations for this thenable's settlement. Returning `Err`
    /// is treated like a synchronous rejection.
    fn subscribe(&self, on_fulfilled: Callback<Value>, on_rejected: Callback<Error>) -> Result<()>;

    /// Returns the native representation, if this is one.
    fn as_native(&self) -> Option<&ThenableValue> {
        None
    }
}

/// Returns true if `value` must be awaited before use.
pub fn is_thenable(value: &Value) -> bool {
    value.is_thenable()
}

enum State {
    Pending(Vec<HandlerPair>),
    Fulfilled(Value),
    Rejected(Error),
}

struct HandlerPair {
    on_fulfilled: Callback<Value>,
    on_rejected: Callback<Error>,
}

impl HandlerPair {
    fn dispatch(self, outcome: Result<Value>) {
        match outcome {
            Ok(value) => (self.on_fulfilled)(value),
            Err(reason) => (self.on_rejected)(reason),
        }
    }
}

/// A value that is either settled or will settle exactly once.
///
/// Cloning yields another handle to the same settlement.
#[derive(Clone)]
pub struct ThenableValue {
    state: Rc<RefCell<State>>,
}

impl ThenableValue {
    /// Runs `executor` immediately with a [`Resolver`] for the new value.
    ///
    /// If the executor returns `Err` before settling, the value rejects with
    /// that error. Once settled, later calls on the resolver do nothing.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver) -> Result<()>,
    {
        let (value, resolver) = Self::deferred();
        if let Err(reason) = executor(resolver.clone()) {
            resolver.reject(reason);
        }
        value
    }

    /// Creates a pending value together with the resolver that settles it.
    pub fn deferred() -> (Self, Resolver) {
        let value = ThenableValue {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
        };
        let resolver = Resolver {
            target: value.clone(),
            done: Rc::new(Cell::new(false)),
        };
        (value, resolver)
    }

    /// A value fulfilled with `value`, or adopting it if it is a thenable.
    pub fn resolve(value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Value::Thenable(thenable) = &value {
            if let Some(native) = thenable.as_native() {
                return native.clone();
            }
        }
        Self::new(|resolver| {
            resolver.resolve(value);
            Ok(())
        })
    }

    /// A value rejected with `reason`.
    pub fn reject(reason: Error) -> Self {
        Self::new(|resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Lifts an immediate result into a settled value.
    pub fn from_result(outcome: Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self::resolve(value),
            Err(reason) => Self::reject(reason),
        }
    }

    /// Attaches handlers and returns the value derived from them.
    ///
    /// A missing handler passes the parent's value or reason through. A
    /// handler returning `Err` rejects the derived value; a handler returning
    /// a thenable makes the derived value adopt it.
    pub fn then_handlers(
        &self,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
    ) -> ThenableValue {
        let (derived, resolver) = Self::deferred();
        let fallback = resolver.clone();
        self.attach(HandlerPair {
            on_fulfilled: Box::new(move |value| match on_fulfilled {
                Some(handler) => resolver.settle(handler(value)),
                None => resolver.resolve(value),
            }),
            on_rejected: Box::new(move |reason| match on_rejected {
                Some(handler) => fallback.settle(handler(reason)),
                None => fallback.reject(reason),
            }),
        });
        derived
    }

    pub fn then<F>(&self, on_fulfilled: F) -> ThenableValue
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.then_handlers(Some(Box::new(on_fulfilled)), None)
    }

    pub fn then_or<F, R>(&self, on_fulfilled: F, on_rejected: R) -> ThenableValue
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
        R: FnOnce(Error) -> Result<Value> + 'static,
    {
        self.then_handlers(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    pub fn catch<R>(&self, on_rejected: R) -> ThenableValue
    where
        R: FnOnce(Error) -> Result<Value> + 'static,
    {
        self.then_handlers(None, Some(Box::new(on_rejected)))
    }

    /// The settled outcome, or `None` while pending.
    pub fn settlement(&self) -> Option<Result<Value>> {
        match &*self.state.borrow() {
            State::Pending(_) => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.borrow(), State::Pending(_))
    }

    /// The settled outcome, or [`Error::Unsettled`] naming `what` while pending.
    pub fn into_settled(self, what: &str) -> Result<Value> {
        self.settlement()
            .unwrap_or_else(|| Err(Error::Unsettled(what.to_string())))
    }

    pub(crate) fn ptr_eq(&self, other: &ThenableValue) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    fn attach(&self, pair: HandlerPair) {
        let outcome = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(handlers) => {
                    handlers.push(pair);
                    return;
                }
                State::Fulfilled(value) => Ok(value.clone()),
                State::Rejected(reason) => Err(reason.clone()),
            }
        };
        pair.dispatch(outcome);
    }

    fn settle(&self, outcome: Result<Value>) {
        let handlers = {
            let mut state = self.state.borrow_mut();
            let State::Pending(handlers) = &mut *state else {
                return;
            };
            let handlers = std::mem::take(handlers);
            *state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            handlers
        };
        for pair in handlers {
            pair.dispatch(outcome.clone());
        }
    }
}

impl Thenable for ThenableValue {
    fn subscribe(&self, on_fulfilled: Callback<Value>, on_rejected: Callback<Error>) -> Result<()> {
        self.attach(HandlerPair {
            on_fulfilled,
            on_rejected,
        });
        Ok(())
    }

    fn as_native(&self) -> Option<&ThenableValue> {
        Some(self)
    }
}

impl fmt::Debug for ThenableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            State::Pending(handlers) => write!(f, "Thenable(<pending, {} handlers>)", handlers.len()),
            State::Fulfilled(value) => f.debug_tuple("Thenable").field(value).finish(),
            State::Rejected(reason) => write!(f, "Thenable(<rejected: {}>)", reason),
        }
    }
}

/// The settlement side of a [`ThenableValue`].
///
/// All clones share one flag: the first `resolve` or `reject` wins.
#[derive(Clone)]
pub struct Resolver {
    target: ThenableValue,
    done: Rc<Cell<bool>>,
}

impl Resolver {
    /// Fulfills the target, adopting `value` if it is a thenable.
    pub fn resolve(&self, value: impl Into<Value>) {
        if self.done.replace(true) {
            return;
        }
        adopt(self.target.clone(), value.into());
    }

    pub fn reject(&self, reason: Error) {
        if self.done.replace(true) {
            return;
        }
        self.target.settle(Err(reason));
    }

    pub fn settle(&self, outcome: Result<Value>) {
        match outcome {
            Ok(value) => self.resolve(value),
            Err(reason) => self.reject(reason),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

/// Subscribes to `thenable`, letting through only the first callback.
pub(crate) fn subscribe_once(
    thenable: &dyn Thenable,
    on_fulfilled: impl FnOnce(Value) + 'static,
    on_rejected: impl FnOnce(Error) + 'static,
) -> Result<()> {
    let fired = Rc::new(Cell::new(false));
    let fired_on_reject = Rc::clone(&fired);
    thenable.subscribe(
        Box::new(move |value| {
            if !fired.replace(true) {
                on_fulfilled(value);
            }
        }),
        Box::new(move |reason| {
            if !fired_on_reject.replace(true) {
                on_rejected(reason);
            }
        }),
    )
}

/// Settles `target` with `value`, following thenables until a plain value.
fn adopt(target: ThenableValue, value: Value) {
    let thenable = match value {
        Value::Thenable(thenable) => thenable,
        plain => return target.settle(Ok(plain)),
    };

    if let Some(native) = thenable.as_native() {
        if native.ptr_eq(&target) {
            target.settle(Err(Error::Type("a thenable cannot adopt itself".into())));
            return;
        }
        if let Some(outcome) = native.settlement() {
            target.settle(outcome);
            return;
        }
    }

    let settled = Rc::new(Cell::new(false));
    let (on_value, on_reason) = (target.clone(), target.clone());
    let (settled_value, settled_reason) = (Rc::clone(&settled), Rc::clone(&settled));
    let subscribed = subscribe_once(
        thenable.as_ref(),
        move |value| {
            settled_value.set(true);
            adopt(on_value, value);
        },
        move |reason| {
            settled_reason.set(true);
            on_reason.settle(Err(reason));
        },
    );
    if let Err(reason) = subscribed {
        if !settled.get() {
            target.settle(Err(reason));
        }
    }
}
