//! Process-wide dispatch runtime.
//!
//! # Mental Model
//!
//! [`DispatchRuntime`] owns one instance of every component: the binding registry, the
//! activation tracker, the joinpoint table, the link table and the pending-task queue.
//! Hosts construct it explicitly and hand clones to their call sites; there is no global
//! state, so independent runtimes can coexist (one per test, for instance).
//!
//! # Data flow
//!
//! activation change -> [`ActivationTracker`] -> joinpoint registration -> generation bump
//! -> the next [`CallSite::invoke`] sees an invalid token -> [`DispatchComposer`] -> new
//! plan installed.
//!
//! # Concurrency
//!
//! Activation transitions and the registrations they trigger are serialized by one
//! structural lock. Invocation never takes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;
use weave_primitives::{
	AggregateId, BindingId, BoundMethodId, ContextId, InstanceId, JoinPointId, JoinPointKey, PlaceholderId,
	Value,
};
use weave_registry::{AggregateDescriptor, Binding, BindingRegistry, RegisterOutcome};

use crate::activation::{ActivationTracker, Transition};
use crate::callsite::CallSite;
use crate::compose::{AdviceCall, Call, DispatchComposer, DispatchPlan, ExecEnv};
use crate::config::RuntimeConfig;
use crate::error::{Fault, LinkageError};
use crate::instance::AggregateInstance;
use crate::joinpoint::{JoinPointTable, MergeTarget};
use crate::link::LinkTable;
use crate::pending::{PendingFn, ReplayReport};
use crate::token::Generation;

type Registrations = FxHashMap<InstanceId, SmallVec<[JoinPointId; 4]>>;

/// Explicitly constructed dispatch runtime. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DispatchRuntime {
	inner: Arc<Inner>,
}

struct Inner {
	config: RuntimeConfig,
	registry: BindingRegistry,
	tracker: ActivationTracker,
	table: JoinPointTable,
	links: LinkTable,
	/// Retires every plan when links or precedence change.
	epoch: Generation,
	/// Joinpoints each registered instance was registered on. Also the structural lock.
	registrations: Mutex<Registrations>,
	next_instance: AtomicU64,
}

impl Default for DispatchRuntime {
	fn default() -> Self {
		Self::new()
	}
}

impl DispatchRuntime {
	pub fn new() -> Self {
		Self::with_config(RuntimeConfig::default())
	}

	pub fn with_config(config: RuntimeConfig) -> Self {
		let table = JoinPointTable::new(&config);
		Self {
			inner: Arc::new(Inner {
				config,
				registry: BindingRegistry::new(),
				tracker: ActivationTracker::new(),
				table,
				links: LinkTable::default(),
				epoch: Generation::new(),
				registrations: Mutex::new(Registrations::default()),
				next_instance: AtomicU64::new(1),
			}),
		}
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.inner.config
	}

	/// Binding catalogue. Mutate it through the runtime so cached plans are retired.
	pub fn registry(&self) -> &BindingRegistry {
		&self.inner.registry
	}

	pub fn tracker(&self) -> &ActivationTracker {
		&self.inner.tracker
	}

	pub fn table(&self) -> &JoinPointTable {
		&self.inner.table
	}

	// Metadata

	/// Declares an aggregate type. Idempotent per name.
	pub fn declare_aggregate(&self, name: &str, super_aggregate: Option<&str>) -> Result<AggregateId, LinkageError> {
		Ok(self.inner.registry.declare_aggregate(name, super_aggregate)?)
	}

	/// Registers bindings of an aggregate and extends the registrations of its live
	/// instances with the new advice.
	pub fn register_aggregate_bindings<I>(
		&self,
		aggregate: AggregateId,
		bindings: I,
	) -> Result<RegisterOutcome, LinkageError>
	where
		I: IntoIterator<Item = Binding>,
	{
		let outcome = self.inner.registry.register_aggregate_bindings(aggregate, bindings)?;
		if outcome.added > 0 {
			self.refresh_registrations()?;
		}
		Ok(outcome)
	}

	/// Loads an aggregate from its descriptor.
	pub fn register_descriptor(&self, desc: &AggregateDescriptor) -> Result<AggregateId, LinkageError> {
		let id = self.inner.registry.register_descriptor(desc)?;
		self.refresh_registrations()?;
		Ok(id)
	}

	/// Adds a precedence sequence, highest priority first.
	pub fn declare_precedence(&self, declared_by: Option<AggregateId>, names: &[&str]) -> Result<(), LinkageError> {
		self.inner.registry.declare_precedence(declared_by, names)?;
		self.inner.epoch.bump();
		Ok(())
	}

	/// Drops an unloaded aggregate class: its bindings leave the registry and every active
	/// list, and its links are forgotten.
	pub fn unload_aggregate(&self, aggregate: AggregateId) -> Result<usize, LinkageError> {
		let regs = self.inner.registrations.lock();
		let removed = self.inner.registry.unload_aggregate(aggregate)?;
		let table = &self.inner.table;
		let mut unregistered = 0;
		for instance in self.registered_instances(&regs) {
			for binding in removed.iter().filter(|b| b.kind.is_advice()) {
				if let Some(jp) = table.id(binding.joinpoint_key().as_str()) {
					unregistered += table.unregister_binding(&instance, binding, jp)?;
				}
			}
		}
		drop(regs);
		self.inner.links.unlink_aggregate(aggregate);
		self.inner.epoch.bump();
		debug!(?aggregate, bindings = removed.len(), unregistered, "unloaded aggregate");
		Ok(removed.len())
	}

	/// Creates an instance of `aggregate` with a fresh id.
	pub fn instantiate(&self, aggregate: AggregateId, state: Value) -> Result<AggregateInstance, LinkageError> {
		if self.inner.registry.aggregate(aggregate).is_none() {
			return Err(LinkageError::UnknownAggregate(aggregate));
		}
		let id = InstanceId(self.inner.next_instance.fetch_add(1, Ordering::Relaxed));
		Ok(AggregateInstance::new(id, aggregate, state))
	}

	// Activation

	/// Activates `instance` for `ctx` ([`ContextId::ALL`] for every context).
	///
	/// The first activation anywhere registers the instance's advice on their joinpoints.
	pub fn activate(&self, instance: &AggregateInstance, ctx: ContextId) -> Result<Transition, LinkageError> {
		let mut regs = self.inner.registrations.lock();
		let transition = self.inner.tracker.activate(instance, ctx);
		if transition.registers() {
			match self.register_instance(instance) {
				Ok(jps) => {
					regs.insert(instance.id(), jps);
				}
				Err(e) => {
					self.inner.tracker.deactivate(instance, ctx);
					return Err(e);
				}
			}
		}
		Ok(transition)
	}

	/// Pops one activation level. The last deactivation anywhere unregisters the instance.
	pub fn deactivate(&self, instance: &AggregateInstance, ctx: ContextId) -> Result<Transition, LinkageError> {
		let mut regs = self.inner.registrations.lock();
		let transition = self.inner.tracker.deactivate(instance, ctx);
		if transition.unregisters() {
			for jp in regs.remove(&instance.id()).unwrap_or_default() {
				self.inner.table.unregister(instance, jp)?;
			}
		}
		Ok(transition)
	}

	pub fn is_active(&self, instance: &AggregateInstance, ctx: ContextId) -> bool {
		self.inner.tracker.is_active(instance.id(), ctx)
	}

	/// Creates joinpoint ids for every advice of `aggregate` without registering anything.
	pub fn prepare_activation(&self, aggregate: AggregateId) -> Result<Vec<JoinPointId>, LinkageError> {
		let mut jps = Vec::new();
		for binding in self.advice_chain(aggregate)? {
			let jp = self.inner.table.get_or_create_id(&binding.joinpoint_key());
			if !jps.contains(&jp) {
				jps.push(jp);
			}
		}
		Ok(jps)
	}

	/// Active `(instance, bindingId)` pairs of `jp` whose instance is active in `ctx`.
	pub fn active_for_context(
		&self,
		jp: JoinPointId,
		ctx: ContextId,
	) -> Result<Vec<(AggregateInstance, BindingId)>, LinkageError> {
		let tracker = &self.inner.tracker;
		Ok(self
			.inner
			.table
			.get_active_bindings(jp)?
			.iter()
			.filter(|e| tracker.is_active(e.instance.id(), ctx))
			.map(|e| (e.instance.clone(), e.binding_id()))
			.collect())
	}

	/// Advice of `aggregate` and its super-aggregates. A sub-aggregate's binding hides a
	/// super binding with the same joinpoint and callin id.
	fn advice_chain(&self, aggregate: AggregateId) -> Result<Vec<Arc<Binding>>, LinkageError> {
		let snap = self.inner.registry.snapshot();
		let mut out: Vec<Arc<Binding>> = Vec::new();
		let mut seen = FxHashSet::default();
		let mut current = Some(aggregate);
		let mut hops = 0;
		while let Some(id) = current {
			let entry = snap.aggregate(id).ok_or(LinkageError::UnknownAggregate(id))?;
			for binding in entry.advice() {
				if seen.insert((binding.joinpoint_key(), binding.local_id)) {
					out.push(binding.clone());
				}
			}
			current = entry.super_aggregate;
			hops += 1;
			if hops > snap.aggregates().len() {
				break;
			}
		}
		Ok(out)
	}

	/// Registers every advice of the instance's aggregate chain. Bindings are visited in
	/// reverse so the first-declared ends up nearest the front.
	fn register_instance(&self, instance: &AggregateInstance) -> Result<SmallVec<[JoinPointId; 4]>, LinkageError> {
		let table = &self.inner.table;
		let mut jps = SmallVec::new();
		for binding in self.advice_chain(instance.aggregate())?.into_iter().rev() {
			let jp = table.get_or_create_id(&binding.joinpoint_key());
			table.register(instance, binding, jp)?;
			if !jps.contains(&jp) {
				jps.push(jp);
			}
		}
		Ok(jps)
	}

	fn registered_instances(&self, regs: &Registrations) -> Vec<AggregateInstance> {
		let mut out = Vec::new();
		for id in regs.keys() {
			if let Some(instance) = self.inner.tracker.registered_instance(*id) {
				out.push(instance);
			}
		}
		out
	}

	/// Re-runs registration for every registered instance after metadata changed.
	fn refresh_registrations(&self) -> Result<(), LinkageError> {
		let mut regs = self.inner.registrations.lock();
		for instance in self.registered_instances(&regs) {
			let jps = self.register_instance(&instance)?;
			regs.insert(instance.id(), jps);
		}
		drop(regs);
		self.inner.epoch.bump();
		Ok(())
	}

	// Joinpoints

	/// Returns the id of a joinpoint descriptor such as `app.Shape.draw()V`.
	pub fn joinpoint_id(&self, descriptor: &str) -> Result<JoinPointId, LinkageError> {
		Ok(self.inner.table.get_or_create_id(&JoinPointKey::parse(descriptor)?))
	}

	pub fn merge_joinpoints(&self, super_jp: JoinPointId, sub: MergeTarget) -> Result<bool, LinkageError> {
		self.inner.table.merge_joinpoints(super_jp, sub)
	}

	pub fn create_placeholder(&self) -> PlaceholderId {
		self.inner.table.create_placeholder()
	}

	pub fn wire_placeholder(&self, ph: PlaceholderId, jp: JoinPointId) -> Result<ReplayReport, LinkageError> {
		self.inner.table.wire_placeholder(ph, jp)
	}

	/// Retires the plans of `jp` and its descendants.
	pub fn invalidate(&self, jp: JoinPointId) -> Result<usize, LinkageError> {
		self.inner.table.invalidate(jp)
	}

	/// Retires every plan.
	pub fn invalidate_all(&self) {
		self.inner.epoch.bump();
	}

	// Pending work

	/// Queues work for the next class-load notification.
	pub fn defer(&self, label: impl Into<String>, task: PendingFn) {
		self.inner.table.defer(label, task);
	}

	/// Replays pending tasks after `class` was loaded.
	pub fn notify_class_loaded(&self, class: &str) -> ReplayReport {
		let report = self.inner.table.replay_pending();
		debug!(class, ?report, "replayed pending tasks");
		report
	}

	// Links

	pub fn link_original<F>(&self, jp: JoinPointId, f: F) -> Result<(), LinkageError>
	where
		F: Fn(&Call<'_>) -> Result<Value, Fault> + Send + Sync + 'static,
	{
		self.inner.links.link_original(jp, Arc::new(f));
		self.inner.table.invalidate(jp)?;
		Ok(())
	}

	pub fn link_advice<F>(&self, aggregate: AggregateId, binding: BindingId, f: F)
	where
		F: Fn(&AdviceCall<'_>) -> Result<Value, Fault> + Send + Sync + 'static,
	{
		self.inner.links.link_advice(aggregate, binding, Arc::new(f));
		self.inner.epoch.bump();
	}

	pub fn link_lifting<F>(&self, aggregate: AggregateId, class: &str, f: F)
	where
		F: Fn(&AggregateInstance, &Value) -> Result<Value, Fault> + Send + Sync + 'static,
	{
		self.inner.links.link_lifting(aggregate, class, Arc::new(f));
		self.inner.epoch.bump();
	}

	// Dispatch

	/// Creates the cache entry of one call site.
	pub fn call_site(&self, descriptor: &str, bound_method: BoundMethodId) -> Result<CallSite, LinkageError> {
		let jp = self.joinpoint_id(descriptor)?;
		Ok(CallSite::new(self.clone(), jp, bound_method))
	}

	/// Composes a fresh plan for `jp`.
	pub fn compose(&self, jp: JoinPointId) -> Result<DispatchPlan, LinkageError> {
		DispatchComposer {
			registry: &self.inner.registry,
			table: &self.inner.table,
			links: &self.inner.links,
			config: &self.inner.config,
			epoch: &self.inner.epoch,
		}
		.compose(jp)
	}

	pub(crate) fn exec_env(&self, ctx: ContextId) -> ExecEnv<'_> {
		ExecEnv {
			tracker: &self.inner.tracker,
			links: &self.inner.links,
			ctx,
			max_call_next_depth: self.inner.config.max_call_next_depth,
		}
	}
}
