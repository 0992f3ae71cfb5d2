//! # Worker Pool
//!
//! A fixed number of worker threads that take items from a bounded queue
//! and pass each one to a shared handler. The queue provides backpressure:
//! a submission waits for a free slot, but only as long as the caller's
//! [`Context`] allows.
//!
//! Every item is handled under its own [`Context`] with a deadline that
//! starts when the item is dequeued. A handler that panics only loses its
//! own item; the worker carries on with the next one.
//!
//! # Build a pool
//!
//! You can use the [`PoolBuilder`] to configure the queue capacity, the
//! number of workers, the per-item deadline and the handler.
//!
//! # Examples
//!
//! ```
//! use workpipe::{Context, PoolBuilder, PoolError};
//! use std::time::Duration;
//!
//! let pool = PoolBuilder::new()
//!     .queue_capacity(1)
//!     .worker_count(1)
//!     .item_deadline(Duration::from_secs(2))
//!     .handler(|ctx: &Context, msg: &'static str| {
//!         println!("{msg}, deadline in {:?}", ctx.remaining());
//!     })
//!     .build();
//! pool.run().unwrap();
//!
//! let (ctx, _cancel) = Context::with_timeout(&Context::background(), Duration::from_secs(2));
//! match pool.process(&ctx, "hello worker pool") {
//!     Ok(()) => {}
//!     Err(PoolError::Timeout) => eprintln!("the pool is congested"),
//!     Err(err) => eprintln!("{err}"),
//! }
//!
//! // Stop the workers and wait for running handlers to return.
//! pool.shutdown().unwrap();
//! ```

mod builder;
mod context;
mod error;
mod pool;

pub(crate) mod task;
pub(crate) mod worker;

pub use builder::*;
pub use context::*;
pub use error::*;
pub use pool::*;
pub use task::{FaultHandler, Handler, HandlerFault};
