//! Memoizing single-flight async initializer.
//!
//! A [`LazyAsyncValue`] runs its factory on first use and shares the outcome
//! with every caller. States:
//! - `Unavailable`: never started, or reset
//! - `Making`: factory in flight; callers join it
//! - `Available`: value or error cached until `reset`
//!
//! The factory runs on its own task, so a caller that stops waiting does not
//! cancel the attempt for everyone else.
//!
//! # Example
//!
//! ```
//! use dapwire::{sync::LazyAsyncValue, DapwireError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let value = LazyAsyncValue::new(|| async { Ok::<_, DapwireError>(42u32) });
//! assert_eq!(value.wait_value().await.unwrap(), 42);
//! assert!(value.is_ready());
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{DapwireError, Result};

/// Boxed future returned by factories.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Factory<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

enum ValueState<T> {
    Unavailable,
    Making {
        generation: u64,
        waiters: Vec<oneshot::Sender<Result<T>>>,
    },
    Available(Result<T>),
}

struct Slot<T> {
    state: ValueState<T>,
    /// Bumped for every attempt; settlement of a stale attempt is ignored.
    generation: u64,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
}

impl<T: Clone> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, generation: u64, result: Result<T>) {
        let waiters = {
            let mut slot = self.lock();
            match &slot.state {
                ValueState::Making { generation: current, .. } if *current == generation => {}
                _ => {
                    tracing::debug!(generation, "discarding stale lazy value result");
                    return;
                }
            }

            match std::mem::replace(&mut slot.state, ValueState::Available(result.clone())) {
                ValueState::Making { waiters, .. } => waiters,
                _ => return,
            }
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Lazily constructed, shared async value with reset-on-failure.
pub struct LazyAsyncValue<T> {
    shared: Arc<Shared<T>>,
    factory: Factory<T>,
}

impl<T> LazyAsyncValue<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state: ValueState::Unavailable,
                    generation: 0,
                }),
            }),
            factory: Arc::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(factory()) }),
        }
    }

    /// Whether a value or error is cached.
    pub fn is_ready(&self) -> bool {
        matches!(self.shared.lock().state, ValueState::Available(_))
    }

    /// The cached outcome, without starting or joining an attempt.
    pub fn try_value(&self) -> Option<Result<T>> {
        match &self.shared.lock().state {
            ValueState::Available(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Get the value, starting the factory if nothing is cached or in flight.
    ///
    /// Cached errors are returned again until [`reset`](Self::reset).
    pub async fn wait_value(&self) -> Result<T> {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut slot = self.shared.lock();

            let start = matches!(slot.state, ValueState::Unavailable);
            if start {
                slot.generation += 1;
                slot.state = ValueState::Making {
                    generation: slot.generation,
                    waiters: Vec::new(),
                };
            }

            match &mut slot.state {
                ValueState::Available(result) => return result.clone(),
                ValueState::Making { waiters, .. } => waiters.push(tx),
                ValueState::Unavailable => return Err(DapwireError::ValueReset),
            }

            start.then_some(slot.generation)
        };

        if let Some(generation) = start {
            let shared = Arc::clone(&self.shared);
            let factory = Arc::clone(&self.factory);
            tokio::spawn(async move {
                let result = factory().await;
                shared.settle(generation, result);
            });
        }

        rx.await.unwrap_or(Err(DapwireError::ValueReset))
    }

    /// Force the value back to `Unavailable`.
    ///
    /// Callers still waiting on an in-flight attempt are rejected with
    /// `error` (or [`DapwireError::ValueReset`]); the next `wait_value`
    /// starts a fresh attempt.
    pub fn reset(&self, error: Option<DapwireError>) {
        let previous = std::mem::replace(&mut self.shared.lock().state, ValueState::Unavailable);

        if let ValueState::Making { waiters, .. } = previous {
            let error = error.unwrap_or(DapwireError::ValueReset);
            for waiter in waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
    }
}

impl<T> Clone for LazyAsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
        }
    }
}
