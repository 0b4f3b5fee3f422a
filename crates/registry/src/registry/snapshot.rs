//! Immutable registry snapshots.
//!
//! # Role
//!
//! Pure view types. A snapshot is never mutated after publication; writers build a new one
//! and swap it in (see [`super::BindingRegistry`]).

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use weave_primitives::{AggregateId, BindingId, DenseId, GlobalId, JoinPointKey, MemberDescriptor};

use crate::binding::Binding;
use crate::precedence::{PrecedenceKey, PrecedenceSequence, PrecedenceTable};

/// Bindings and derived maps of one aggregate type.
#[derive(Debug, Clone)]
pub struct AggregateEntry {
	pub id: AggregateId,
	pub name: Arc<str>,
	pub super_aggregate: Option<AggregateId>,
	/// Bindings in declaration order.
	pub bindings: Vec<Arc<Binding>>,
	/// Access id -> global member id.
	pub access_ids: FxHashMap<BindingId, GlobalId>,
	/// Set once the aggregate class was unloaded; its bindings are gone.
	pub unloaded: bool,
}

impl AggregateEntry {
	pub(super) fn new(id: AggregateId, name: Arc<str>, super_aggregate: Option<AggregateId>) -> Self {
		Self {
			id,
			name,
			super_aggregate,
			bindings: Vec::new(),
			access_ids: FxHashMap::default(),
			unloaded: false,
		}
	}

	/// Advice bindings in declaration order.
	pub fn advice(&self) -> impl Iterator<Item = &Arc<Binding>> + '_ {
		self.bindings.iter().filter(|b| b.kind.is_advice())
	}

	/// Finds the advice binding with the given callin id.
	pub fn advice_binding(&self, local_id: BindingId) -> Option<&Arc<Binding>> {
		self.advice().find(|b| b.local_id == local_id)
	}

	/// Returns true if one of the bindings carries `label`.
	pub fn has_label(&self, label: &str) -> bool {
		self.bindings.iter().any(|b| b.label.as_deref() == Some(label))
	}
}

/// Single source of truth for binding lookups.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
	pub(super) aggregates: Arc<[Arc<AggregateEntry>]>,
	pub(super) by_name: Arc<FxHashMap<Arc<str>, AggregateId>>,
	/// Advice bindings by joinpoint key, precedence-sorted.
	pub(super) by_joinpoint: Arc<FxHashMap<JoinPointKey, Arc<[Arc<Binding>]>>>,
	pub(super) sequences: Arc<[PrecedenceSequence]>,
	pub(super) precedence: Arc<PrecedenceTable>,
	pub(super) member_ids: Arc<FxHashMap<MemberDescriptor, GlobalId>>,
	pub(super) next_global_id: u32,
	/// Bumped on every publication.
	pub generation: u64,
}

impl RegistrySnapshot {
	/// Looks up an aggregate by id.
	#[inline]
	pub fn aggregate(&self, id: AggregateId) -> Option<&Arc<AggregateEntry>> {
		self.aggregates.get(id.index())
	}

	/// Looks up an aggregate id by name.
	#[inline]
	pub fn aggregate_id(&self, name: &str) -> Option<AggregateId> {
		self.by_name.get(name).copied()
	}

	/// Name of an aggregate, or `"?"` for unknown ids.
	pub fn aggregate_name(&self, id: AggregateId) -> &str {
		self.aggregate(id).map_or("?", |a| &a.name)
	}

	/// All aggregates in id order.
	pub fn aggregates(&self) -> &[Arc<AggregateEntry>] {
		&self.aggregates
	}

	/// Advice bindings targeting `key`, across all aggregates, precedence-sorted.
	pub fn bindings_for(&self, key: &JoinPointKey) -> &[Arc<Binding>] {
		self.by_joinpoint.get(key).map_or(&[][..], |v| &v[..])
	}

	/// Precedence table currently in effect.
	pub fn precedence(&self) -> &PrecedenceTable {
		&self.precedence
	}

	/// Sort key of a binding under this snapshot's precedence table.
	pub fn precedence_key(&self, binding: &Binding) -> PrecedenceKey {
		PrecedenceKey::new(&self.precedence, self.aggregate_name(binding.aggregate), binding)
	}

	/// Total precedence order; `Less` means `a` runs nearer the caller.
	pub fn precedence_compare(&self, a: &Binding, b: &Binding) -> Ordering {
		self.precedence_key(a).cmp(&self.precedence_key(b))
	}

	/// Stable sort by precedence; equal keys keep their input order.
	pub fn sort_by_precedence<T, F>(&self, items: &mut [T], binding: F)
	where
		F: Fn(&T) -> &Binding,
	{
		items.sort_by_cached_key(|item| self.precedence_key(binding(item)));
	}

	/// Maps an aggregate-local access id to its global member id, searching super-aggregates.
	pub fn member_id(&self, aggregate: AggregateId, access_id: BindingId) -> Option<GlobalId> {
		let mut current = Some(aggregate);
		// Super chains are acyclic by construction, the bound guards against corrupt input.
		for _ in 0..=self.aggregates.len() {
			let entry = self.aggregate(current?)?;
			if let Some(id) = entry.access_ids.get(&access_id) {
				return Some(*id);
			}
			current = entry.super_aggregate;
		}
		None
	}

	/// Rebuilds the derived indexes after a structural change.
	pub(super) fn reindex(&mut self) {
		let aggregates = self.aggregates.clone();
		let precedence = PrecedenceTable::build(&self.sequences, |agg, name| {
			self.by_name
				.get(agg)
				.and_then(|id| aggregates.get(id.index()))
				.is_some_and(|entry| entry.has_label(name))
		});
		self.precedence = Arc::new(precedence);

		let mut by_joinpoint: FxHashMap<JoinPointKey, Vec<Arc<Binding>>> = FxHashMap::default();
		for entry in aggregates.iter() {
			for binding in entry.advice() {
				by_joinpoint
					.entry(binding.joinpoint_key())
					.or_default()
					.push(binding.clone());
			}
		}
		self.by_joinpoint = Arc::new(
			by_joinpoint
				.into_iter()
				.map(|(key, mut list)| {
					self.sort_by_precedence(&mut list, |b| &**b);
					(key, Arc::from(list))
				})
				.collect(),
		);
		self.generation += 1;
	}
}
