//! Dynamic join-point dispatch.
//!
//! At every invocation of an instrumented member the runtime decides which advice
//! currently applies, composes it with the original body, and caches the result at the
//! call site until the applicable set changes.
//!
//! # Components
//!
//! - [`activation`] - Per-context activation state of aggregate instances
//! - [`joinpoint`] - Joinpoint ids, active binding lists and the merge graph
//! - [`compose`] - Plan composition and execution
//! - [`callsite`] - Per call-site plan cache
//! - [`runtime`] - The [`DispatchRuntime`] context object tying them together
//!
//! Bindings and precedence come from [`weave_registry`].

pub mod activation;
pub mod callsite;
pub mod compose;
mod config;
mod error;
mod instance;
pub mod joinpoint;
pub mod link;
pub mod pending;
pub mod runtime;
pub mod token;

pub use activation::{ActivationTracker, ActivationView, Transition};
pub use callsite::CallSite;
pub use compose::{AdviceCall, Call, DispatchComposer, DispatchPlan, PlanStep};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{Fault, LinkageError};
pub use instance::AggregateInstance;
pub use joinpoint::{ActiveEntry, ActiveList, JoinPointTable, MergeTarget};
pub use link::{AdviceFn, LiftingFn, LinkTable, OriginalFn};
pub use pending::{PendingFn, PendingTasks, ReplayReport, TaskStatus};
pub use runtime::DispatchRuntime;
pub use token::{Generation, InvalidationToken, Stamp};

#[cfg(test)]
pub(crate) mod test_fixtures;
