//! Per-context activation state of aggregate instances.
//!
//! # Mental Model
//!
//! An instance is active for the contexts that explicitly activated it and not elsewhere.
//! Activation nests: each `activate` pushes one level for its context and each
//! `deactivate` pops one. [`ContextId::ALL`] is an ordinary entry whose presence makes the
//! instance active for every context.
//!
//! The tracker only records state. The owner reacts to the returned [`Transition`]s:
//! `Activated { first: true }` and `Deactivated { last: true }` mark the instance's entry
//! into and exit from registry-level membership.
//!
//! # Concurrency
//!
//! Writers serialize on one mutex and publish an immutable [`ActivationView`] after every
//! change. Readers on the dispatch path load the view without locking.

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;
use weave_primitives::{ContextId, InstanceId};

use crate::instance::AggregateInstance;

/// Outcome of one activation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// The instance became active for the context. `first` when it was inactive everywhere.
	Activated { first: bool },
	/// The instance became inactive for the context. `last` when it is now inactive everywhere.
	Deactivated { last: bool },
	/// Nesting depth changed while the state stayed active.
	Nested { depth: u32 },
	/// Nothing happened: the instance was not active for the context.
	Unchanged,
}

impl Transition {
	/// Returns true when registry-level membership must be established.
	pub const fn registers(self) -> bool {
		matches!(self, Self::Activated { first: true })
	}

	/// Returns true when registry-level membership must be dropped.
	pub const fn unregisters(self) -> bool {
		matches!(self, Self::Deactivated { last: true })
	}
}

type Contexts = SmallVec<[ContextId; 2]>;

struct Activation {
	instance: AggregateInstance,
	/// Nesting depth per context; entries are removed at depth zero.
	depths: SmallVec<[(ContextId, u32); 2]>,
}

impl Activation {
	fn depth(&self, ctx: ContextId) -> u32 {
		self.depths
			.iter()
			.find_map(|&(c, d)| (c == ctx).then_some(d))
			.unwrap_or(0)
	}

	fn contexts(&self) -> Contexts {
		self.depths.iter().map(|&(c, _)| c).collect()
	}
}

/// Published snapshot of which instances are active in which contexts.
#[derive(Debug, Clone, Default)]
pub struct ActivationView {
	contexts: FxHashMap<InstanceId, Contexts>,
}

impl ActivationView {
	/// Returns true if `instance` is active for `ctx`, directly or through [`ContextId::ALL`].
	#[inline]
	pub fn is_active(&self, instance: InstanceId, ctx: ContextId) -> bool {
		self.contexts
			.get(&instance)
			.is_some_and(|cs| cs.iter().any(|&c| c == ctx || c.is_all()))
	}

	/// Returns true if `instance` is active for at least one context.
	pub fn is_registered(&self, instance: InstanceId) -> bool {
		self.contexts.contains_key(&instance)
	}

	fn with(&self, instance: InstanceId, state: Option<&Activation>) -> Self {
		let mut contexts = self.contexts.clone();
		match state {
			Some(state) => contexts.insert(instance, state.contexts()),
			None => contexts.remove(&instance),
		};
		Self { contexts }
	}
}

/// Tracks which instances are active in which execution contexts.
#[derive(Default)]
pub struct ActivationTracker {
	states: Mutex<FxHashMap<InstanceId, Activation>>,
	view: ArcSwap<ActivationView>,
}

impl ActivationTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Pushes one activation level of `instance` for `ctx`.
	pub fn activate(&self, instance: &AggregateInstance, ctx: ContextId) -> Transition {
		let mut states = self.states.lock();
		let state = states.entry(instance.id()).or_insert_with(|| Activation {
			instance: instance.clone(),
			depths: SmallVec::new(),
		});
		let first = state.depths.is_empty();
		let transition = match state.depths.iter_mut().find(|(c, _)| *c == ctx) {
			Some((_, depth)) => {
				*depth += 1;
				Transition::Nested { depth: *depth }
			}
			None => {
				state.depths.push((ctx, 1));
				let next = self.view.load().with(instance.id(), Some(&*state));
				self.view.store(Arc::new(next));
				Transition::Activated { first }
			}
		};
		debug!(?instance, ?ctx, ?transition, "activate");
		transition
	}

	/// Pops one activation level of `instance` for `ctx`.
	pub fn deactivate(&self, instance: &AggregateInstance, ctx: ContextId) -> Transition {
		let mut states = self.states.lock();
		let Some(state) = states.get_mut(&instance.id()) else {
			debug!(?instance, ?ctx, "deactivate of inactive instance ignored");
			return Transition::Unchanged;
		};
		let Some(pos) = state.depths.iter().position(|(c, _)| *c == ctx) else {
			debug!(?instance, ?ctx, "deactivate of inactive instance ignored");
			return Transition::Unchanged;
		};

		let depth = &mut state.depths[pos].1;
		*depth -= 1;
		let transition = if *depth > 0 {
			Transition::Nested { depth: *depth }
		} else {
			state.depths.swap_remove(pos);
			let last = state.depths.is_empty();
			let next = if last {
				states.remove(&instance.id());
				self.view.load().with(instance.id(), None)
			} else {
				self.view.load().with(instance.id(), Some(&*state))
			};
			self.view.store(Arc::new(next));
			Transition::Deactivated { last }
		};
		debug!(?instance, ?ctx, ?transition, "deactivate");
		transition
	}

	/// Current published activation state. Lock-free.
	#[inline]
	pub fn view(&self) -> Guard<Arc<ActivationView>> {
		self.view.load()
	}

	/// Returns true if `instance` is active for `ctx`, directly or through [`ContextId::ALL`].
	pub fn is_active(&self, instance: InstanceId, ctx: ContextId) -> bool {
		self.view.load().is_active(instance, ctx)
	}

	/// Returns true if `instance` is active for at least one context.
	pub fn is_registered(&self, instance: InstanceId) -> bool {
		self.view.load().is_registered(instance)
	}

	/// Current nesting depth of `instance` for exactly `ctx`.
	pub fn depth(&self, instance: InstanceId, ctx: ContextId) -> u32 {
		self.states.lock().get(&instance).map_or(0, |s| s.depth(ctx))
	}

	/// Instances active for `ctx`.
	pub fn active_in(&self, ctx: ContextId) -> Vec<AggregateInstance> {
		let view = self.view.load();
		self.states
			.lock()
			.values()
			.filter(|s| view.is_active(s.instance.id(), ctx))
			.map(|s| s.instance.clone())
			.collect()
	}

	/// The instance behind `id`, while it is active for at least one context.
	pub fn registered_instance(&self, id: InstanceId) -> Option<AggregateInstance> {
		self.states.lock().get(&id).map(|s| s.instance.clone())
	}
}
