//! # Stackkit
//!
//! A compact declarative infrastructure engine.
//!
//! Programs declare cloud resources as data, wire them together with
//! deferred [`Output`] values, and hand the resulting graph to the executor,
//! which diffs it against persisted stack state and drives a provider to
//! converge.
//!
//! ## Core Concepts
//!
//! - **ResourceDecl**: A declared resource - a type token plus named inputs
//! - **Output**: A deferred value produced by a resource, composable with
//!   `.map()` before it is known
//! - **Stack**: The registration surface; resources, barriers, and exports
//! - **ExecutionPlan**: The ordered, validated set of steps for one run
//! - **Executor**: Applies or destroys a plan against a [`ResourceProvider`]
//! - **StackState**: Persisted record of everything created so far
//!
//! ## Example
//!
//! ```ignore
//! use stackkit::{Stack, ResourceDecl};
//!
//! let mut stack = Stack::new("prod");
//! let bucket = stack.register(
//!     ResourceDecl::new("central-state", "aws:s3:Bucket")
//!         .input("tags", serde_json::json!({"managed-by": "orgctl"})),
//! )?;
//! let name: stackkit::Output<String> = bucket.output("bucket_name");
//! stack.export("state-bucket", name);
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`ResourceProvider`]: Performs the actual create/update/delete calls
//! - [`Waiter`]: Sleeps out propagation barriers (swappable in tests)
//! - [`StateSink`]: Persists state after every step
//!
//! This keeps the engine free of any cloud SDK; the binary supplies the
//! real implementations.

pub mod error;
pub mod executor;
pub mod output;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod stack;
pub mod state;

// Re-export main types at crate root
pub use error::{Error, ErrorCategory, Result};
pub use executor::{ExecuteSummary, apply, destroy};
pub use output::Output;
pub use planner::{ExecutionPlan, PlannedStep, StepAction, plan};
pub use provider::{
    CreateRequest, CreatedResource, DeleteRequest, NullSink, ResourceProvider, StateSink,
    TokioWaiter, UpdateRequest, Waiter,
};
pub use resource::{BARRIER_TYPE, InputValue, ResourceDecl, ResourceHandle, ResourceId};
pub use stack::Stack;
pub use state::{ResourceRecord, StackState};
