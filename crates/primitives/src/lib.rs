//! Core types for join-point dispatch: dense ids, member descriptors, and the
//! dynamic values passed through intercepted calls.

/// Joinpoint and member descriptors.
pub mod descriptor;
/// Dense identifier types for runtime entities.
pub mod ids;
/// Dynamically typed call arguments and results.
pub mod value;

pub use descriptor::{DescriptorError, JoinPointKey, MemberDescriptor, MemberFlags};
pub use ids::{
	AggregateId, BindingId, BoundMethodId, ContextId, DenseId, GlobalId, InstanceId, JoinPointId,
	PlaceholderId,
};
pub use value::Value;
