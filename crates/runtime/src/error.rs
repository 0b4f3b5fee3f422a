use std::error::Error as StdError;
use std::sync::Arc;

use weave_primitives::{AggregateId, BindingId, DescriptorError, JoinPointId, PlaceholderId, Value};
use weave_registry::RegistryError;

/// Static configuration errors. Fatal at first use and never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkageError {
	/// No lifting accessor from the bound class to the aggregate's role view.
	#[error("no lifting from {class} into aggregate {aggregate}")]
	LiftingNotFound { aggregate: String, class: String },

	#[error("advice {binding} of aggregate {aggregate} is not linked")]
	AdviceNotLinked { aggregate: String, binding: BindingId },

	#[error("original body of {0} is not linked")]
	OriginalNotLinked(String),

	#[error("unknown joinpoint {0:?}")]
	UnknownJoinPoint(JoinPointId),

	#[error("unknown aggregate {0:?}")]
	UnknownAggregate(AggregateId),

	#[error("unknown placeholder {0:?}")]
	UnknownPlaceholder(PlaceholderId),

	/// `call_next` used from before or after advice.
	#[error("call-next is only available to replace advice")]
	CallNextUnavailable,

	/// Nested call-next re-entries exceeded the configured bound.
	#[error("call-next nesting exceeded {0}")]
	CallNextDepth(usize),

	#[error(transparent)]
	Registry(#[from] RegistryError),

	#[error(transparent)]
	Descriptor(#[from] DescriptorError),
}

/// Error channel of advice and original bodies.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Fault {
	/// An error raised by advice or the original body, propagated verbatim.
	#[error(transparent)]
	Raised(Arc<dyn StdError + Send + Sync>),

	/// Short-circuits the whole invocation with a value. Unwrapped by the call site.
	#[error("early return")]
	Return(Value),

	#[error(transparent)]
	Linkage(#[from] LinkageError),
}

impl Fault {
	/// Wraps an arbitrary error raised by intercepted code.
	pub fn raise<E>(err: E) -> Self
	where
		E: StdError + Send + Sync + 'static,
	{
		Self::Raised(Arc::new(err))
	}

	/// Returns the raised error, if any.
	pub fn raised(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
		match self {
			Self::Raised(err) => Some(&**err),
			_ => None,
		}
	}
}
