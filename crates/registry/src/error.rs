use weave_primitives::{AggregateId, BindingId, DescriptorError};

/// Binding registration failures. All of them indicate broken metadata.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
	/// Two bindings share `(target, localId)` but disagree on content.
	#[error("duplicate binding {local_id} on {target} in aggregate {aggregate:?} with different content")]
	DuplicateBinding {
		aggregate: String,
		target: String,
		local_id: BindingId,
	},

	#[error("unknown aggregate {0:?}")]
	UnknownAggregate(String),

	#[error("unknown aggregate id {0:?}")]
	UnknownAggregateId(AggregateId),

	/// A binding handed to an aggregate names a different owner.
	#[error("binding {local_id} is owned by {found:?}, not {expected:?}")]
	ForeignBinding {
		expected: AggregateId,
		found: AggregateId,
		local_id: BindingId,
	},

	#[error("malformed binding {local_id} in aggregate {aggregate:?}: {reason}")]
	MalformedBinding {
		aggregate: String,
		local_id: BindingId,
		reason: &'static str,
	},

	/// An aggregate was redeclared with a different super-aggregate.
	#[error("aggregate {aggregate:?} redeclared with super {new:?} (was {existing:?})")]
	ConflictingSuper {
		aggregate: String,
		existing: Option<String>,
		new: Option<String>,
	},

	#[error(transparent)]
	Descriptor(#[from] DescriptorError),

	#[error("invalid aggregate descriptor: {0}")]
	Decode(String),
}
