//! Precedence ordering among bindings competing for the same joinpoint.
//!
//! # Contract
//!
//! [`precedence_compare`] is a total order. Sorting ascending puts the binding that runs
//! nearest the caller (highest priority) first:
//!
//! 1. Advice bindings sort before access and association bindings.
//! 2. Before/after advice sort before replace advice.
//! 3. Precedence rank: declared label sequences are linearized into one rank per name.
//!    Aggregate names are ranked first, then qualified binding labels (`aggregate.label`).
//!    Names never mentioned by any sequence rank last. Unrelated names are ordered by
//!    first declaration.
//! 4. `(boundClass, memberName, signature)`, then member flags.
//!
//! Bindings that compare equal keep their relative order; callers sort stably so that
//! activation order decides the remaining ties.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::binding::Binding;

/// Rank assigned to names that no precedence sequence mentions.
pub const UNRANKED: u32 = u32::MAX;

/// A declared precedence sequence, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedenceSequence {
	/// Aggregate that declared the sequence; `None` for host-level sequences.
	pub declared_by: Option<Arc<str>>,
	pub names: Vec<Arc<str>>,
}

/// Linearized precedence ranks, rebuilt whenever sequences or bindings change.
#[derive(Debug, Clone, Default)]
pub struct PrecedenceTable {
	ranks: FxHashMap<Arc<str>, u32>,
}

impl PrecedenceTable {
	/// Builds the table from sequences in declaration order.
	///
	/// `is_label(aggregate, name)` reports whether `name` is a binding label of `aggregate`;
	/// such names are qualified as `aggregate.name` so labels of different aggregates do not
	/// collide.
	pub fn build<F>(sequences: &[PrecedenceSequence], is_label: F) -> Self
	where
		F: Fn(&str, &str) -> bool,
	{
		let mut graph = Graph::default();
		for seq in sequences {
			let mut prev: Option<usize> = None;
			for name in &seq.names {
				let qualified = match &seq.declared_by {
					Some(agg) if is_label(agg, name) => Arc::from(qualify(agg, name)),
					_ => name.clone(),
				};
				let n = graph.node(qualified);
				if let Some(p) = prev {
					graph.edge(p, n);
				}
				prev = Some(n);
			}
		}
		let Graph {
			order,
			edges,
			mut in_degree,
			..
		} = graph;

		// Kahn's algorithm, choosing the earliest-declared ready node. A cycle is broken by
		// releasing the earliest-declared remaining node.
		let mut ranks = FxHashMap::default();
		let mut ready: BTreeSet<usize> = (0..order.len()).filter(|&n| in_degree[n] == 0).collect();
		let mut done = vec![false; order.len()];
		let mut next_rank = 0u32;
		while next_rank as usize != order.len() {
			let n = match ready.pop_first() {
				Some(n) => n,
				None => match (0..order.len()).find(|&n| !done[n]) {
					Some(n) => n,
					None => break,
				},
			};
			if done[n] {
				continue;
			}
			done[n] = true;
			ranks.insert(order[n].clone(), next_rank);
			next_rank += 1;
			for &m in &edges[n] {
				in_degree[m] = in_degree[m].saturating_sub(1);
				if in_degree[m] == 0 && !done[m] {
					ready.insert(m);
				}
			}
		}

		Self { ranks }
	}

	/// Rank of a name, or [`UNRANKED`].
	pub fn rank(&self, name: &str) -> u32 {
		self.ranks.get(name).copied().unwrap_or(UNRANKED)
	}

	/// Rank of a binding label qualified by its aggregate name.
	pub fn label_rank(&self, aggregate: &str, label: &str) -> u32 {
		self.rank(&qualify(aggregate, label))
	}

	/// Returns true if no sequence was declared.
	pub fn is_empty(&self) -> bool {
		self.ranks.is_empty()
	}
}

#[derive(Default)]
struct Graph {
	order: Vec<Arc<str>>,
	index: FxHashMap<Arc<str>, usize>,
	edges: Vec<SmallVec<[usize; 2]>>,
	in_degree: Vec<usize>,
}

impl Graph {
	fn node(&mut self, name: Arc<str>) -> usize {
		if let Some(&n) = self.index.get(&name) {
			return n;
		}
		let n = self.order.len();
		self.order.push(name.clone());
		self.index.insert(name, n);
		self.edges.push(SmallVec::new());
		self.in_degree.push(0);
		n
	}

	fn edge(&mut self, from: usize, to: usize) {
		if from != to && !self.edges[from].contains(&to) {
			self.edges[from].push(to);
			self.in_degree[to] += 1;
		}
	}
}

fn qualify(aggregate: &str, label: &str) -> String {
	format!("{aggregate}.{label}")
}

/// Precomputed sort key for a binding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrecedenceKey {
	kind: u8,
	aggregate: u32,
	label: u32,
	class: Arc<str>,
	member: Arc<str>,
	signature: Arc<str>,
	flags: u16,
}

impl PrecedenceKey {
	/// Computes the key of `binding`, owned by the aggregate called `aggregate_name`.
	pub fn new(table: &PrecedenceTable, aggregate_name: &str, binding: &Binding) -> Self {
		let label = binding
			.label
			.as_deref()
			.map_or(UNRANKED, |l| table.label_rank(aggregate_name, l));
		Self {
			kind: binding.kind.precedence_rank(),
			aggregate: table.rank(aggregate_name),
			label,
			class: binding.target.class.clone(),
			member: binding.target.member.clone(),
			signature: binding.target.signature.clone(),
			flags: binding.flags.bits(),
		}
	}
}

/// Compares two bindings; see the module docs for the order.
pub fn precedence_compare(
	table: &PrecedenceTable,
	(a_aggregate, a): (&str, &Binding),
	(b_aggregate, b): (&str, &Binding),
) -> Ordering {
	PrecedenceKey::new(table, a_aggregate, a).cmp(&PrecedenceKey::new(table, b_aggregate, b))
}
