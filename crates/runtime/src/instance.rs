use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use weave_primitives::{AggregateId, InstanceId, Value};

/// A live aggregate object that can be activated and whose advice runs during dispatch.
///
/// Cheap to clone; identity is the [`InstanceId`].
#[derive(Clone)]
pub struct AggregateInstance(Arc<Inner>);

struct Inner {
	id: InstanceId,
	aggregate: AggregateId,
	state: Value,
}

impl AggregateInstance {
	/// Creates an instance. Ids must be unique within a runtime; prefer
	/// [`DispatchRuntime::instantiate`](crate::DispatchRuntime::instantiate).
	pub fn new(id: InstanceId, aggregate: AggregateId, state: Value) -> Self {
		Self(Arc::new(Inner { id, aggregate, state }))
	}

	#[inline]
	pub fn id(&self) -> InstanceId {
		self.0.id
	}

	#[inline]
	pub fn aggregate(&self) -> AggregateId {
		self.0.aggregate
	}

	/// Host state attached to the instance.
	pub fn state(&self) -> &Value {
		&self.0.state
	}
}

impl PartialEq for AggregateInstance {
	fn eq(&self, other: &Self) -> bool {
		self.0.id == other.0.id
	}
}

impl Eq for AggregateInstance {}

impl Hash for AggregateInstance {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.id.hash(state);
	}
}

impl fmt::Debug for AggregateInstance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}@{:?}", self.0.id, self.0.aggregate)
	}
}
