//! Binding catalogue for join-point dispatch.
//!
//! Aggregates declare bindings (before/after/replace advice, decapsulated access, base-class
//! associations). The [`BindingRegistry`] indexes them by joinpoint and keeps every index
//! sorted by [`precedence`].
//!
//! # Modules
//!
//! - [`binding`] - Binding kinds and descriptors
//! - [`descriptor`] - TOML aggregate metadata
//! - [`precedence`] - Total ordering among competing bindings
//! - [`registry`] - Snapshot-published registry

pub mod binding;
pub mod descriptor;
mod error;
pub mod precedence;
pub mod registry;

pub use binding::{AdviceMember, Binding, BindingKind};
pub use descriptor::{AdviceDescriptor, AggregateDescriptor, BindingDescriptor, FlagName};
pub use error::RegistryError;
pub use precedence::{PrecedenceKey, PrecedenceSequence, PrecedenceTable, UNRANKED};
pub use registry::{AggregateEntry, BindingRegistry, RegisterOutcome, RegistrySnapshot};
