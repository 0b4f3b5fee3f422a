//! Runtime binding catalogue with atomic publication.
//!
//! # Mental Model
//!
//! 1. **Declaration:** an aggregate type is declared once by name and receives a dense
//!    [`AggregateId`]. Redeclaring the same name returns the same id.
//! 2. **Registration:** [`BindingRegistry::register_aggregate_bindings`] merges the bindings
//!    delivered by the metadata loader into a new [`RegistrySnapshot`] and publishes it.
//! 3. **Consumption:** readers load the current snapshot and perform lookups without locks.
//!
//! # Concurrency
//!
//! - **Reads:** wait-free (atomic load of the current snapshot).
//! - **Writes:** lock-free with linearizability (CAS retry loop, as in the other registries).
//!
//! # Invariants
//!
//! - Registering the same binding twice is a no-op.
//!   - Tested by: `tests::reregistering_identical_bindings_is_a_noop`
//! - Two bindings with the same `(target, localId)` must agree on content.
//!   - Enforced in: [`BindingRegistry::register_aggregate_bindings`]
//!   - Failure symptom: [`RegistryError::DuplicateBinding`].
//! - Advice bindings for a joinpoint are kept precedence-sorted.
//!   - Enforced in: [`RegistrySnapshot::reindex`]

mod snapshot;

use std::cmp::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};
use weave_primitives::{AggregateId, BindingId, DenseId, GlobalId, JoinPointKey, MemberDescriptor};

pub use self::snapshot::{AggregateEntry, RegistrySnapshot};
use crate::binding::Binding;
use crate::descriptor::AggregateDescriptor;
use crate::error::RegistryError;
use crate::precedence::PrecedenceSequence;

/// Summary of one registration call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOutcome {
	/// Bindings that were new.
	pub added: usize,
	/// Bindings already present with identical content.
	pub unchanged: usize,
}

/// Catalogue of bindings owned by every declared aggregate.
pub struct BindingRegistry {
	snap: ArcSwap<RegistrySnapshot>,
}

impl Default for BindingRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl BindingRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self {
			snap: ArcSwap::from_pointee(RegistrySnapshot::default()),
		}
	}

	/// Returns the current snapshot.
	#[inline]
	pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
		self.snap.load_full()
	}

	/// Declares an aggregate type, returning its id. Idempotent per name.
	pub fn declare_aggregate(
		&self,
		name: &str,
		super_aggregate: Option<&str>,
	) -> Result<AggregateId, RegistryError> {
		self.update(|old| {
			let super_id = match super_aggregate {
				Some(s) => Some(
					old.aggregate_id(s)
						.ok_or_else(|| RegistryError::UnknownAggregate(s.to_string()))?,
				),
				None => None,
			};
			if let Some(id) = old.aggregate_id(name) {
				let existing = old.aggregate(id).and_then(|e| e.super_aggregate);
				if existing != super_id {
					return Err(RegistryError::ConflictingSuper {
						aggregate: name.to_string(),
						existing: existing.map(|s| old.aggregate_name(s).to_string()),
						new: super_aggregate.map(str::to_string),
					});
				}
				return Ok((None, id));
			}

			let id = AggregateId::from_u32(old.aggregates.len() as u32);
			let name: Arc<str> = Arc::from(name);
			let mut next = old.clone();
			let mut aggregates = old.aggregates.to_vec();
			aggregates.push(Arc::new(AggregateEntry::new(id, name.clone(), super_id)));
			next.aggregates = Arc::from(aggregates);
			let mut by_name = (*old.by_name).clone();
			by_name.insert(name, id);
			next.by_name = Arc::new(by_name);
			next.reindex();
			Ok((Some(next), id))
		})
	}

	/// Merges `bindings` into the aggregate's binding set.
	///
	/// Bindings already present with identical content are skipped. The whole call fails
	/// without publishing anything if one binding conflicts with an existing one.
	pub fn register_aggregate_bindings<I>(
		&self,
		aggregate: AggregateId,
		bindings: I,
	) -> Result<RegisterOutcome, RegistryError>
	where
		I: IntoIterator<Item = Binding>,
	{
		let incoming: Vec<Binding> = bindings.into_iter().collect();
		let outcome = self.update(|old| {
			let entry = old
				.aggregate(aggregate)
				.ok_or(RegistryError::UnknownAggregateId(aggregate))?;
			let mut entry = AggregateEntry::clone(entry);
			let mut member_ids = (*old.member_ids).clone();
			let mut next_global_id = old.next_global_id;
			let mut outcome = RegisterOutcome::default();

			for binding in &incoming {
				if binding.aggregate != aggregate {
					return Err(RegistryError::ForeignBinding {
						expected: aggregate,
						found: binding.aggregate,
						local_id: binding.local_id,
					});
				}
				if binding.kind.is_advice() && binding.advice.is_none() {
					return Err(RegistryError::MalformedBinding {
						aggregate: entry.name.to_string(),
						local_id: binding.local_id,
						reason: "advice binding without advice member",
					});
				}

				let existing = entry.bindings.iter().find(|b| {
					b.target == binding.target && b.local_id == binding.local_id && b.kind.is_access() == binding.kind.is_access()
				});
				if let Some(existing) = existing {
					if **existing == *binding || same_modulo_global_id(existing, binding) {
						outcome.unchanged += 1;
						continue;
					}
					return Err(RegistryError::DuplicateBinding {
						aggregate: entry.name.to_string(),
						target: binding.target.to_string(),
						local_id: binding.local_id,
					});
				}

				let mut binding = binding.clone();
				if binding.kind.is_access() {
					let global = match binding.global_id {
						Some(id) => {
							member_ids.entry(binding.target.clone()).or_insert(id);
							next_global_id = next_global_id.max(id.0 + 1);
							id
						}
						None => *member_ids.entry(binding.target.clone()).or_insert_with(|| {
							let id = GlobalId(next_global_id);
							next_global_id += 1;
							id
						}),
					};
					binding.global_id = Some(global);
					entry.access_ids.insert(binding.local_id, global);
				}
				entry.bindings.push(Arc::new(binding));
				outcome.added += 1;
			}

			if outcome.added == 0 {
				return Ok((None, outcome));
			}
			entry.unloaded = false;

			let mut next = old.clone();
			let mut aggregates = old.aggregates.to_vec();
			aggregates[aggregate.index()] = Arc::new(entry);
			next.aggregates = Arc::from(aggregates);
			next.member_ids = Arc::new(member_ids);
			next.next_global_id = next_global_id;
			next.reindex();
			Ok((Some(next), outcome))
		})?;

		if outcome.added > 0 {
			info!(
				aggregate = %self.snapshot().aggregate_name(aggregate),
				added = outcome.added,
				unchanged = outcome.unchanged,
				"registered aggregate bindings"
			);
		}
		Ok(outcome)
	}

	/// Declares the aggregate described by `desc` and registers its bindings and precedence.
	pub fn register_descriptor(&self, desc: &AggregateDescriptor) -> Result<AggregateId, RegistryError> {
		let id = self.declare_aggregate(&desc.name, desc.super_aggregate.as_deref())?;
		let bindings = desc.to_bindings(id)?;
		self.register_aggregate_bindings(id, bindings)?;
		for seq in &desc.precedence {
			let names: Vec<&str> = seq.iter().map(String::as_str).collect();
			self.declare_precedence(Some(id), &names)?;
		}
		Ok(id)
	}

	/// Adds a precedence sequence, highest priority first.
	///
	/// Sequences declared by an aggregate may name its binding labels; host-level sequences
	/// (`declared_by = None`) usually order aggregates. Redeclaring a sequence is a no-op.
	pub fn declare_precedence(
		&self,
		declared_by: Option<AggregateId>,
		names: &[&str],
	) -> Result<(), RegistryError> {
		self.update(|old| {
			let declared_by = match declared_by {
				Some(id) => Some(
					old.aggregate(id)
						.ok_or(RegistryError::UnknownAggregateId(id))?
						.name
						.clone(),
				),
				None => None,
			};
			let seq = PrecedenceSequence {
				declared_by,
				names: names.iter().map(|n| Arc::from(*n)).collect(),
			};
			if old.sequences.contains(&seq) {
				return Ok((None, ()));
			}
			let mut next = old.clone();
			let mut sequences = old.sequences.to_vec();
			sequences.push(seq);
			next.sequences = Arc::from(sequences);
			next.reindex();
			Ok((Some(next), ()))
		})?;
		debug!(?declared_by, ?names, "declared precedence");
		Ok(())
	}

	/// Drops all bindings of an unloaded aggregate class. The id stays reserved.
	pub fn unload_aggregate(&self, aggregate: AggregateId) -> Result<Vec<Arc<Binding>>, RegistryError> {
		self.update(|old| {
			let entry = old
				.aggregate(aggregate)
				.ok_or(RegistryError::UnknownAggregateId(aggregate))?;
			if entry.unloaded {
				return Ok((None, Vec::new()));
			}
			let mut entry = AggregateEntry::clone(entry);
			let removed = std::mem::take(&mut entry.bindings);
			entry.access_ids.clear();
			entry.unloaded = true;

			let mut next = old.clone();
			let mut aggregates = old.aggregates.to_vec();
			aggregates[aggregate.index()] = Arc::new(entry);
			next.aggregates = Arc::from(aggregates);
			next.reindex();
			Ok((Some(next), removed))
		})
	}

	/// Looks up an aggregate id by name.
	pub fn aggregate_id(&self, name: &str) -> Option<AggregateId> {
		self.snap.load().aggregate_id(name)
	}

	/// Returns an aggregate entry.
	pub fn aggregate(&self, id: AggregateId) -> Option<Arc<AggregateEntry>> {
		self.snap.load().aggregate(id).cloned()
	}

	/// Advice bindings targeting `key` across all aggregates, precedence-sorted.
	pub fn bindings_for(&self, key: &JoinPointKey) -> Vec<Arc<Binding>> {
		self.snap.load().bindings_for(key).to_vec()
	}

	/// Advice bindings of one aggregate targeting `key`, precedence-sorted.
	pub fn advice_for(&self, aggregate: AggregateId, key: &JoinPointKey) -> Vec<Arc<Binding>> {
		self.snap
			.load()
			.bindings_for(key)
			.iter()
			.filter(|b| b.aggregate == aggregate)
			.cloned()
			.collect()
	}

	/// Looks up a binding of `aggregate` by target member and local id.
	pub fn binding(
		&self,
		aggregate: AggregateId,
		target: &MemberDescriptor,
		local_id: BindingId,
	) -> Option<Arc<Binding>> {
		let snap = self.snap.load();
		snap.aggregate(aggregate)?
			.bindings
			.iter()
			.find(|b| &b.target == target && b.local_id == local_id)
			.cloned()
	}

	/// Base classes the aggregate declares an association with.
	pub fn associated_classes(&self, aggregate: AggregateId) -> Vec<Arc<str>> {
		let snap = self.snap.load();
		snap.aggregate(aggregate)
			.map(|entry| {
				entry
					.bindings
					.iter()
					.filter(|b| b.kind == crate::BindingKind::AggregateAssociation)
					.map(|b| b.target.class.clone())
					.collect()
			})
			.unwrap_or_default()
	}

	/// Maps an access id of `aggregate` (or one of its super-aggregates) to a global member id.
	pub fn member_id(&self, aggregate: AggregateId, access_id: BindingId) -> Option<GlobalId> {
		self.snap.load().member_id(aggregate, access_id)
	}

	/// Total precedence order under the current snapshot.
	pub fn precedence_compare(&self, a: &Binding, b: &Binding) -> Ordering {
		self.snap.load().precedence_compare(a, b)
	}

	/// Applies `f` to the current snapshot and publishes the result with CAS, retrying on
	/// contention. `f` returns `None` as the snapshot when nothing changes.
	fn update<R, F>(&self, f: F) -> Result<R, RegistryError>
	where
		F: Fn(&RegistrySnapshot) -> Result<(Option<RegistrySnapshot>, R), RegistryError>,
	{
		loop {
			let old = self.snap.load_full();
			let (next, out) = f(&old)?;
			let Some(next) = next else {
				return Ok(out);
			};
			let prev = self.snap.compare_and_swap(&old, Arc::new(next));
			if Arc::ptr_eq(&prev, &old) {
				return Ok(out);
			}
			// CAS failed, retry with updated snapshot
		}
	}
}

/// Access bindings without an explicit global id compare equal to their registered form.
fn same_modulo_global_id(existing: &Binding, incoming: &Binding) -> bool {
	incoming.global_id.is_none() && existing.kind.is_access() && {
		let mut probe = incoming.clone();
		probe.global_id = existing.global_id;
		*existing == probe
	}
}

#[cfg(test)]
mod tests;
