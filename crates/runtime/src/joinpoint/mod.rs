//! Joinpoint arena and per-joinpoint active binding lists.
//!
//! # Mental Model
//!
//! - **Ids:** every distinct [`JoinPointKey`] gets a dense [`JoinPointId`] on first
//!   reference. Ids are never reused or freed.
//! - **Active lists:** each joinpoint owns an ordered list of `(instance, binding)` pairs.
//!   Index 0 is the newest registration. Readers see an immutable published copy.
//! - **Merge graph:** `super -> sub` edges between joinpoints of a class hierarchy. The
//!   graph is a DAG; registration on a joinpoint propagates to every descendant.
//! - **Generations:** each joinpoint carries a [`Generation`]; every mutation of its list
//!   bumps it, retiring outstanding [`InvalidationToken`]s.
//!
//! # Concurrency
//!
//! - List mutation locks only the affected joinpoint's list.
//! - The merge graph sits behind a read/write lock: registrations share it, merges take
//!   it exclusively so that a replicated list can never miss a concurrent registration.
//! - Id assignment takes the id map's write lock only on first reference.
//!
//! # Invariants
//!
//! - An active list never holds the same `(instance, aggregate, bindingId)` twice.
//!   - Enforced in: `Slot::insert_front`
//!   - Tested by: `tests::registration_is_idempotent`
//! - A joinpoint's published list and generation change together under its lock.
//!   - Enforced in: `Slot::publish`

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;
use weave_primitives::{AggregateId, BindingId, DenseId, InstanceId, JoinPointId, JoinPointKey, PlaceholderId};
use weave_registry::Binding;

use crate::config::RuntimeConfig;
use crate::error::LinkageError;
use crate::instance::AggregateInstance;
use crate::pending::{PendingFn, PendingTasks, ReplayReport, TaskStatus};
use crate::token::{Generation, InvalidationToken, Stamp};

/// One active `(instance, binding)` pair.
#[derive(Debug, Clone)]
pub struct ActiveEntry {
	pub instance: AggregateInstance,
	pub binding: Arc<Binding>,
}

impl ActiveEntry {
	pub fn new(instance: AggregateInstance, binding: Arc<Binding>) -> Self {
		Self { instance, binding }
	}

	/// Callin id of the binding.
	#[inline]
	pub fn binding_id(&self) -> BindingId {
		self.binding.local_id
	}

	/// `(instance, bindingId)` view used by callers and tests.
	pub fn pair(&self) -> (InstanceId, BindingId) {
		(self.instance.id(), self.binding.local_id)
	}

	fn identity(&self) -> (InstanceId, AggregateId, BindingId) {
		(self.instance.id(), self.binding.aggregate, self.binding.local_id)
	}
}

/// Published, immutable active list.
pub type ActiveList = Arc<Vec<ActiveEntry>>;

/// Subclass side of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTarget {
	JoinPoint(JoinPointId),
	/// Provisional subclass not yet resolved to a concrete joinpoint.
	Placeholder(PlaceholderId),
}

struct Slot {
	key: JoinPointKey,
	active: Mutex<Vec<ActiveEntry>>,
	published: ArcSwap<Vec<ActiveEntry>>,
	generation: Generation,
}

impl Slot {
	fn new(key: JoinPointKey) -> Self {
		Self {
			key,
			active: Mutex::new(Vec::new()),
			published: ArcSwap::from_pointee(Vec::new()),
			generation: Generation::new(),
		}
	}

	/// Inserts entries at the front, keeping their relative order and skipping pairs
	/// already present. Returns the number inserted.
	fn insert_front(&self, entries: &[ActiveEntry]) -> usize {
		let mut active = self.active.lock();
		let mut inserted = 0;
		for entry in entries.iter().rev() {
			let identity = entry.identity();
			if active.iter().any(|e| e.identity() == identity) {
				continue;
			}
			active.insert(0, entry.clone());
			inserted += 1;
		}
		if inserted > 0 {
			self.publish(&active);
		}
		inserted
	}

	fn remove_where(&self, pred: impl Fn(&ActiveEntry) -> bool) -> usize {
		let mut active = self.active.lock();
		let before = active.len();
		active.retain(|e| !pred(e));
		let removed = before - active.len();
		if removed > 0 {
			self.publish(&active);
		}
		removed
	}

	/// Publishes the list, then bumps the generation. Caller holds the list lock.
	fn publish(&self, active: &[ActiveEntry]) {
		self.published.store(Arc::new(active.to_vec()));
		self.generation.bump();
	}
}

#[derive(Default)]
struct MergeGraph {
	subs: FxHashMap<JoinPointId, SmallVec<[JoinPointId; 2]>>,
	/// Resolution of each placeholder; `None` until wired.
	placeholders: Vec<Option<JoinPointId>>,
}

impl MergeGraph {
	/// `root` followed by all of its descendants, each once.
	fn closure(&self, root: JoinPointId) -> SmallVec<[JoinPointId; 4]> {
		let mut out = SmallVec::new();
		let mut seen = FxHashSet::default();
		let mut stack: SmallVec<[JoinPointId; 8]> = SmallVec::new();
		stack.push(root);
		while let Some(id) = stack.pop() {
			if !seen.insert(id) {
				continue;
			}
			out.push(id);
			if let Some(subs) = self.subs.get(&id) {
				stack.extend(subs.iter().rev().copied());
			}
		}
		out
	}
}

/// Process-lifetime table of joinpoints and their active bindings.
pub struct JoinPointTable {
	ids: RwLock<FxHashMap<JoinPointKey, JoinPointId>>,
	slots: RwLock<Vec<Arc<Slot>>>,
	graph: RwLock<MergeGraph>,
	pending: PendingTasks,
	max_pending_retries: Option<u32>,
}

impl Default for JoinPointTable {
	fn default() -> Self {
		Self::new(&RuntimeConfig::default())
	}
}

impl JoinPointTable {
	pub fn new(config: &RuntimeConfig) -> Self {
		Self {
			ids: RwLock::new(FxHashMap::with_capacity_and_hasher(
				config.joinpoint_capacity,
				Default::default(),
			)),
			slots: RwLock::new(Vec::with_capacity(config.joinpoint_capacity)),
			graph: RwLock::new(MergeGraph::default()),
			pending: PendingTasks::default(),
			max_pending_retries: config.max_pending_retries,
		}
	}

	/// Returns the id of `key`, assigning the next id on first reference.
	pub fn get_or_create_id(&self, key: &JoinPointKey) -> JoinPointId {
		if let Some(&id) = self.ids.read().get(key) {
			return id;
		}
		let mut ids = self.ids.write();
		if let Some(&id) = ids.get(key) {
			return id;
		}
		let mut slots = self.slots.write();
		let id = JoinPointId::from_u32(slots.len() as u32);
		slots.push(Arc::new(Slot::new(key.clone())));
		ids.insert(key.clone(), id);
		debug!(joinpoint = %key, ?id, "assigned joinpoint id");
		id
	}

	/// Looks up an already assigned id.
	pub fn id(&self, key: &str) -> Option<JoinPointId> {
		self.ids.read().get(key).copied()
	}

	/// Key of a joinpoint.
	pub fn key(&self, jp: JoinPointId) -> Option<JoinPointKey> {
		self.slots.read().get(jp.index()).map(|s| s.key.clone())
	}

	/// Number of assigned ids.
	pub fn len(&self) -> usize {
		self.slots.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn slot(&self, jp: JoinPointId) -> Result<Arc<Slot>, LinkageError> {
		self.slots
			.read()
			.get(jp.index())
			.cloned()
			.ok_or(LinkageError::UnknownJoinPoint(jp))
	}

	/// Registers `binding` of `instance` at the front of `jp`'s list and of every
	/// descendant's. Returns the number of lists that changed.
	pub fn register(
		&self,
		instance: &AggregateInstance,
		binding: Arc<Binding>,
		jp: JoinPointId,
	) -> Result<usize, LinkageError> {
		let graph = self.graph.read();
		let targets = graph.closure(jp);
		let entry = [ActiveEntry::new(instance.clone(), binding)];
		let mut changed = 0;
		for id in targets {
			if self.slot(id)?.insert_front(&entry) > 0 {
				changed += 1;
			}
		}
		debug!(?instance, binding = %entry[0].binding, ?jp, changed, "registered");
		Ok(changed)
	}

	/// Removes every entry of `instance` from `jp` and its descendants. Returns the
	/// number of entries removed.
	pub fn unregister(&self, instance: &AggregateInstance, jp: JoinPointId) -> Result<usize, LinkageError> {
		let id = instance.id();
		let removed = self.remove_where(jp, |e| e.instance.id() == id)?;
		debug!(?instance, ?jp, removed, "unregistered");
		Ok(removed)
	}

	/// Removes one binding of `instance` from `jp` and its descendants.
	pub fn unregister_binding(
		&self,
		instance: &AggregateInstance,
		binding: &Binding,
		jp: JoinPointId,
	) -> Result<usize, LinkageError> {
		let identity = (instance.id(), binding.aggregate, binding.local_id);
		self.remove_where(jp, |e| e.identity() == identity)
	}

	fn remove_where(&self, jp: JoinPointId, pred: impl Fn(&ActiveEntry) -> bool) -> Result<usize, LinkageError> {
		let graph = self.graph.read();
		let mut removed = 0;
		for id in graph.closure(jp) {
			removed += self.slot(id)?.remove_where(&pred);
		}
		Ok(removed)
	}

	/// Links `sub` under `super_jp`, replicating the currently active pairs of `super_jp`
	/// into `sub` and its descendants. Future registrations on `super_jp` propagate.
	///
	/// Merging into an unwired placeholder is deferred until
	/// [`wire_placeholder`](Self::wire_placeholder). Returns false when nothing changed now.
	pub fn merge_joinpoints(&self, super_jp: JoinPointId, sub: MergeTarget) -> Result<bool, LinkageError> {
		let sub = match sub {
			MergeTarget::JoinPoint(sub) => sub,
			MergeTarget::Placeholder(ph) => {
				self.slot(super_jp)?;
				// Checked and queued under the write lock, so wiring either happens first
				// or replays this task.
				let graph = self.graph.write();
				match graph.placeholders.get(ph.index()).copied() {
					None => return Err(LinkageError::UnknownPlaceholder(ph)),
					Some(Some(sub)) => {
						drop(graph);
						sub
					}
					Some(None) => {
						self.pending.push(
							format!("merge {super_jp:?} into {ph:?}"),
							Box::new(move |table: &JoinPointTable| match table.placeholder(ph)? {
								Some(sub) => table.merge_into(super_jp, sub).map(|_| TaskStatus::Done),
								None => Ok(TaskStatus::Waiting),
							}),
						);
						return Ok(false);
					}
				}
			}
		};
		self.merge_into(super_jp, sub)
	}

	fn merge_into(&self, super_jp: JoinPointId, sub: JoinPointId) -> Result<bool, LinkageError> {
		let super_slot = self.slot(super_jp)?;
		self.slot(sub)?;

		let mut graph = self.graph.write();
		let subs = graph.subs.entry(super_jp).or_default();
		if super_jp == sub || subs.contains(&sub) {
			return Ok(false);
		}
		subs.push(sub);

		let entries = super_slot.published.load_full();
		let mut replicated = 0;
		for id in graph.closure(sub) {
			replicated += self.slot(id)?.insert_front(&entries);
		}
		debug!(super_jp = ?super_jp, sub = ?sub, replicated, "merged joinpoints");
		Ok(true)
	}

	/// Direct subjoinpoints of `jp`.
	pub fn subjoinpoints(&self, jp: JoinPointId) -> Vec<JoinPointId> {
		self.graph
			.read()
			.subs
			.get(&jp)
			.map(|s| s.to_vec())
			.unwrap_or_default()
	}

	/// Reserves a placeholder for a subclass that is not resolved yet.
	pub fn create_placeholder(&self) -> PlaceholderId {
		let mut graph = self.graph.write();
		let id = PlaceholderId::from_u32(graph.placeholders.len() as u32);
		graph.placeholders.push(None);
		id
	}

	fn placeholder(&self, ph: PlaceholderId) -> Result<Option<JoinPointId>, LinkageError> {
		self.graph
			.read()
			.placeholders
			.get(ph.index())
			.copied()
			.ok_or(LinkageError::UnknownPlaceholder(ph))
	}

	/// Resolves a placeholder to a concrete joinpoint and replays pending tasks.
	///
	/// A placeholder is wired once; later calls keep the first resolution.
	pub fn wire_placeholder(&self, ph: PlaceholderId, jp: JoinPointId) -> Result<ReplayReport, LinkageError> {
		self.slot(jp)?;
		{
			let mut graph = self.graph.write();
			let slot = graph
				.placeholders
				.get_mut(ph.index())
				.ok_or(LinkageError::UnknownPlaceholder(ph))?;
			if slot.is_none() {
				*slot = Some(jp);
				debug!(?ph, ?jp, "wired placeholder");
			}
		}
		Ok(self.replay_pending())
	}

	/// Queues a task for the next replay.
	pub fn defer(&self, label: impl Into<String>, task: PendingFn) {
		self.pending.push(label, task);
	}

	/// Replays pending tasks once.
	pub fn replay_pending(&self) -> ReplayReport {
		self.pending.replay(self, self.max_pending_retries)
	}

	pub fn pending(&self) -> &PendingTasks {
		&self.pending
	}

	/// Consistent snapshot of `jp`'s active list. Index 0 is the newest registration.
	pub fn get_active_bindings(&self, jp: JoinPointId) -> Result<ActiveList, LinkageError> {
		Ok(self.slot(jp)?.published.load_full())
	}

	/// Observes the generation and then loads the list, so that the stamp is never newer
	/// than the list it describes.
	pub(crate) fn observe(&self, jp: JoinPointId) -> Result<(Stamp, ActiveList), LinkageError> {
		let slot = self.slot(jp)?;
		let stamp = slot.generation.observe();
		Ok((stamp, slot.published.load_full()))
	}

	/// Token retired by the next mutation of `jp`'s list.
	pub fn token(&self, jp: JoinPointId) -> Result<InvalidationToken, LinkageError> {
		Ok(InvalidationToken::from_stamps([self.slot(jp)?.generation.observe()]))
	}

	/// Retires all tokens of `jp` and its descendants without touching their lists.
	pub fn invalidate(&self, jp: JoinPointId) -> Result<usize, LinkageError> {
		let graph = self.graph.read();
		let targets = graph.closure(jp);
		for &id in &targets {
			self.slot(id)?.generation.bump();
		}
		debug!(?jp, count = targets.len(), "invalidated joinpoints");
		Ok(targets.len())
	}
}

#[cfg(test)]
mod tests;
