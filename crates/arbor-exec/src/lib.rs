//! # arbor-exec
//!
//! Asynchronous composition for ArborDB.
//!
//! Every engine operation returns a [`Promise`] instead of blocking. Work and
//! continuations run on an [`Executor`]: a fixed pool of worker threads fed by
//! one global run queue.
//!
//! A caller that has to wait for a result never simply sleeps while work is
//! queued. [`Promise::wait`] first runs the task producing the awaited
//! promise if it is still queued, then any other queued task, and only parks
//! once the queue is empty or the nesting limit is reached.
//!
//! ```text
//!   spawn / submit                       wait()
//!        │                                 │
//!        ▼                                 ▼
//!  ┌───────────────┐  pop_front   ┌──────────────────┐
//!  │  run queue    │─────────────▶│ worker threads   │
//!  │ (FIFO, global)│              └──────────────────┘
//!  │               │  steal (producer first)
//!  │               │─────────────▶ waiting caller
//!  └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use arbor_exec::{Executor, Promise};
//!
//! let executor = Executor::new(2);
//! let doubled = executor
//!     .spawn(|| Ok(21))
//!     .then(&executor, |v| Ok(v * 2));
//! assert_eq!(doubled.wait(&executor).unwrap(), 42);
//!
//! let all = Promise::all(vec![Promise::ready(1), Promise::ready(2)]);
//! assert_eq!(all.wait(&executor).unwrap(), vec![1, 2]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Worker pool and run queue.
pub mod executor;

/// Completable results with continuation combinators.
pub mod promise;

pub use executor::{Executor, ExecutorStats};
pub use promise::Promise;
