//! Explicit link table of host closures.
//!
//! The weaver registers a closure for every original method body, every advice method and
//! every lifting accessor when the owning class initializes. Dispatch never resolves
//! members reflectively.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use weave_primitives::{AggregateId, BindingId, JoinPointId, Value};

use crate::compose::{AdviceCall, Call};
use crate::error::Fault;
use crate::instance::AggregateInstance;

/// Original member body of a joinpoint.
pub type OriginalFn = Arc<dyn Fn(&Call<'_>) -> Result<Value, Fault> + Send + Sync>;

/// Advice member of an aggregate, keyed by the owning aggregate and callin id.
pub type AdviceFn = Arc<dyn Fn(&AdviceCall<'_>) -> Result<Value, Fault> + Send + Sync>;

/// Converts a base receiver into the aggregate-internal role view.
pub type LiftingFn = Arc<dyn Fn(&AggregateInstance, &Value) -> Result<Value, Fault> + Send + Sync>;

#[derive(Default)]
pub struct LinkTable {
	originals: RwLock<FxHashMap<JoinPointId, OriginalFn>>,
	advice: RwLock<FxHashMap<(AggregateId, BindingId), AdviceFn>>,
	liftings: RwLock<FxHashMap<AggregateId, FxHashMap<Arc<str>, LiftingFn>>>,
}

impl LinkTable {
	pub fn link_original(&self, jp: JoinPointId, f: OriginalFn) -> Option<OriginalFn> {
		self.originals.write().insert(jp, f)
	}

	pub fn link_advice(&self, aggregate: AggregateId, binding: BindingId, f: AdviceFn) -> Option<AdviceFn> {
		self.advice.write().insert((aggregate, binding), f)
	}

	pub fn link_lifting(&self, aggregate: AggregateId, class: &str, f: LiftingFn) -> Option<LiftingFn> {
		self.liftings
			.write()
			.entry(aggregate)
			.or_default()
			.insert(Arc::from(class), f)
	}

	pub fn original(&self, jp: JoinPointId) -> Option<OriginalFn> {
		self.originals.read().get(&jp).cloned()
	}

	pub fn advice(&self, aggregate: AggregateId, binding: BindingId) -> Option<AdviceFn> {
		self.advice.read().get(&(aggregate, binding)).cloned()
	}

	pub fn lifting(&self, aggregate: AggregateId, class: &str) -> Option<LiftingFn> {
		self.liftings.read().get(&aggregate)?.get(class).cloned()
	}

	/// Drops every advice and lifting link of `aggregate`.
	pub fn unlink_aggregate(&self, aggregate: AggregateId) {
		self.advice.write().retain(|(agg, _), _| *agg != aggregate);
		self.liftings.write().remove(&aggregate);
	}
}
