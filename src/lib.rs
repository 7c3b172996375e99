//! Distributed Linda tuple space for Rust.
//!
//! Cooperating peers communicate by inserting, reading and withdrawing
//! dynamically typed tuples through content-based matching: the classical
//! Linda coordination primitives (`out`, `in`, `inp`, `rd`, `rdp`, `eval`)
//! over a fixed peer set that jointly owns the space.
//!
//! This library contains:
//!
//! - the [value](mod@value) and [tuple](mod@tuple) model with the closed,
//!   totally ordered scalar set;
//! - [queries](query) mixing concrete values and typed wildcards;
//! - the indexed, thread-safe [store](store) with blocking and non-blocking
//!   content matches;
//! - the canonical [wire encoding](wire);
//! - the per-peer [work pool](pool) and [runtime](runtime), including the
//!   two-phase distributed withdrawal that keeps destructive matches
//!   at-most-once across the cluster;
//! - [dynamic call dispatch](call) behind `eval`;
//! - a process-local [mesh transport](transport::local) for tests and demos.
//!
//! ```
//! use linda::runtime::{Options, Runtime};
//! use linda::transport::local::LocalMesh;
//! use linda::{query, query::formal, tuple};
//! use std::sync::Arc;
//!
//! let mut nodes = LocalMesh::new(1).into_iter();
//! let rt = Runtime::new(Arc::new(nodes.next().unwrap()), Options::default()).unwrap();
//!
//! rt.out(tuple!("x", 42i32)).unwrap();
//! let bound = rt.in_(&query!("x", formal::<i32>()));
//! assert_eq!(bound.get::<i32>(1), Some(42));
//! ```

pub mod balance;
pub mod call;
pub mod error;
pub mod pool;
pub mod query;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod tuple;
pub mod value;
pub mod wire;

pub use error::{Error, Result};
pub use query::{formal, Field, Query};
pub use runtime::{current, Options, Runtime, RuntimeHandle};
pub use store::Store;
pub use tuple::Tuple;
pub use value::{FnCall, Value, ValueKind};

// `register_function!` expands to a distributed-slice element; re-exported
// so downstream crates resolve it without naming the dependency themselves.
pub use linkme;
