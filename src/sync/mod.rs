//! Async hand-off primitives shared by the transport and remoting layers.
//!
//! - [`AsyncQueue`] - unbounded FIFO with a single suspended consumer
//! - [`LazyAsyncValue`] - single-flight lazy initializer with reset

mod lazy;
mod queue;

pub use lazy::{BoxFuture, LazyAsyncValue};
pub use queue::AsyncQueue;
