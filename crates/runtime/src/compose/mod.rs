//! Dispatch plan composition and execution.
//!
//! # Mental Model
//!
//! A [`DispatchPlan`] is the composed form of one joinpoint's active list: precedence-sorted
//! before advice, replace advice and after advice, plus the original body. Plans do not
//! depend on the invoking context. When an invocation starts, the steps whose instances are
//! active in the invoking context are selected once from the published activation view.
//! The whole invocation, call-next hops included, runs on that selection.
//!
//! Execution order:
//!
//! 1. Active before advice, highest precedence first. Results are discarded.
//! 2. The ground call: the first active replace advice, or the original body if none is
//!    active. A replace may `call_next`, which continues with the next active replace after
//!    it in the same plan, ending in the original body.
//! 3. Active after advice, lowest precedence first, so the highest precedence advice is
//!    outermost. Results are discarded.
//!
//! Only replace advice substitute the result. Advice may short-circuit the whole invocation
//! with [`Fault::Return`].

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;
use weave_primitives::{BoundMethodId, ContextId, JoinPointId, JoinPointKey, MemberFlags, Value};
use weave_registry::{Binding, BindingKind, BindingRegistry};

use crate::activation::{ActivationTracker, ActivationView};
use crate::config::RuntimeConfig;
use crate::error::{Fault, LinkageError};
use crate::instance::AggregateInstance;
use crate::joinpoint::{ActiveEntry, JoinPointTable};
use crate::link::{AdviceFn, LiftingFn, LinkTable, OriginalFn};
use crate::token::{Generation, InvalidationToken};

/// Arguments of one intercepted call, as seen by the original body.
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
	pub receiver: &'a Value,
	pub bound_method: BoundMethodId,
	pub args: &'a [Value],
}

/// What an advice member sees when it runs.
pub struct AdviceCall<'a> {
	instance: &'a AggregateInstance,
	binding: &'a Binding,
	role: &'a Value,
	receiver: &'a Value,
	args: &'a [Value],
	result: Option<&'a Value>,
	next: Option<Next<'a>>,
}

impl<'a> AdviceCall<'a> {
	pub fn instance(&self) -> &'a AggregateInstance {
		self.instance
	}

	pub fn binding(&self) -> &'a Binding {
		self.binding
	}

	/// Receiver lifted into the aggregate's role view. [`Value::Unit`] for static targets.
	pub fn role(&self) -> &'a Value {
		self.role
	}

	/// Unlifted base receiver.
	pub fn receiver(&self) -> &'a Value {
		self.receiver
	}

	pub fn args(&self) -> &'a [Value] {
		self.args
	}

	/// Result of the ground call; present for after advice only.
	pub fn result(&self) -> Option<&'a Value> {
		self.result
	}

	/// Invokes the next handler in the chain: the next active replace of lower precedence,
	/// or the original body.
	pub fn call_next(&self, args: &[Value]) -> Result<Value, Fault> {
		let next = self.next.ok_or(LinkageError::CallNextUnavailable)?;
		let max = next.exec.env.max_call_next_depth;
		if next.depth >= max {
			return Err(LinkageError::CallNextDepth(max).into());
		}
		next.exec.ground(args, next.from, next.depth + 1)
	}
}

#[derive(Clone, Copy)]
struct Next<'a> {
	exec: &'a Execution<'a>,
	/// First selected replace not yet processed.
	from: usize,
	depth: usize,
}

/// One advice step of a plan with its resolved links.
#[derive(Clone)]
pub struct PlanStep {
	entry: ActiveEntry,
	aggregate_name: Arc<str>,
	advice: Option<AdviceFn>,
	lifting: Option<LiftingFn>,
}

impl PlanStep {
	pub fn entry(&self) -> &ActiveEntry {
		&self.entry
	}

	fn lifts(&self) -> bool {
		!self.entry.binding.flags.contains(MemberFlags::STATIC)
	}

	fn resolve_advice(&self, links: &LinkTable) -> Result<AdviceFn, LinkageError> {
		let binding = &self.entry.binding;
		self.advice
			.clone()
			.or_else(|| links.advice(binding.aggregate, binding.local_id))
			.ok_or_else(|| LinkageError::AdviceNotLinked {
				aggregate: self.aggregate_name.to_string(),
				binding: binding.local_id,
			})
	}

	fn resolve_lifting(&self, links: &LinkTable) -> Result<LiftingFn, LinkageError> {
		let binding = &self.entry.binding;
		self.lifting
			.clone()
			.or_else(|| links.lifting(binding.aggregate, &binding.target.class))
			.ok_or_else(|| LinkageError::LiftingNotFound {
				aggregate: self.aggregate_name.to_string(),
				class: binding.target.class.to_string(),
			})
	}
}

/// Composed invocation chain for one joinpoint.
pub struct DispatchPlan {
	joinpoint: JoinPointId,
	key: JoinPointKey,
	before: Vec<PlanStep>,
	replaces: Vec<PlanStep>,
	after: Vec<PlanStep>,
	original: Option<OriginalFn>,
	token: InvalidationToken,
}

impl DispatchPlan {
	pub fn joinpoint(&self) -> JoinPointId {
		self.joinpoint
	}

	pub fn key(&self) -> &JoinPointKey {
		&self.key
	}

	pub fn token(&self) -> &InvalidationToken {
		&self.token
	}

	/// Returns true while the snapshot this plan was composed from is current.
	#[inline]
	pub fn is_valid(&self) -> bool {
		self.token.is_valid()
	}

	/// Before advice in precedence order.
	pub fn before(&self) -> &[PlanStep] {
		&self.before
	}

	/// Replace advice in precedence order; at most one runs unless it calls next.
	pub fn replaces(&self) -> &[PlanStep] {
		&self.replaces
	}

	/// After advice in precedence order.
	pub fn after(&self) -> &[PlanStep] {
		&self.after
	}

	/// The replace that wins for `ctx`: the first one whose instance is active there.
	pub fn effective_replace(&self, tracker: &ActivationTracker, ctx: ContextId) -> Option<&ActiveEntry> {
		let view = tracker.view();
		self.replaces
			.iter()
			.map(|s| &s.entry)
			.find(|e| view.is_active(e.instance.id(), ctx))
	}

	/// Runs the plan for one call.
	pub(crate) fn execute(&self, env: &ExecEnv<'_>, call: &Call<'_>) -> Result<Value, Fault> {
		let selection = Selection::new(self, &env.tracker.view(), env.ctx);
		let exec = Execution {
			plan: self,
			env,
			selection: &selection,
			receiver: call.receiver,
			bound_method: call.bound_method,
		};
		for &i in &selection.before {
			exec.run(&self.before[i], call.args, None, None)?;
		}
		let result = exec.ground(call.args, 0, 0)?;
		for &i in selection.after.iter().rev() {
			exec.run(&self.after[i], call.args, Some(&result), None)?;
		}
		Ok(result)
	}
}

/// Indices of the steps active for one invocation, fixed when it starts.
struct Selection {
	before: SmallVec<[usize; 4]>,
	replaces: SmallVec<[usize; 4]>,
	after: SmallVec<[usize; 4]>,
}

impl Selection {
	fn new(plan: &DispatchPlan, view: &ActivationView, ctx: ContextId) -> Self {
		let pick = |steps: &[PlanStep]| -> SmallVec<[usize; 4]> {
			steps
				.iter()
				.enumerate()
				.filter(|(_, s)| view.is_active(s.entry.instance.id(), ctx))
				.map(|(i, _)| i)
				.collect()
		};
		Self {
			before: pick(&plan.before),
			replaces: pick(&plan.replaces),
			after: pick(&plan.after),
		}
	}
}

/// Live state consulted while a plan runs.
pub(crate) struct ExecEnv<'a> {
	pub tracker: &'a ActivationTracker,
	pub links: &'a LinkTable,
	pub ctx: ContextId,
	pub max_call_next_depth: usize,
}

struct Execution<'a> {
	plan: &'a DispatchPlan,
	env: &'a ExecEnv<'a>,
	selection: &'a Selection,
	receiver: &'a Value,
	bound_method: BoundMethodId,
}

impl Execution<'_> {
	/// Runs the selected replace at position `from`, else the original body.
	fn ground(&self, args: &[Value], from: usize, depth: usize) -> Result<Value, Fault> {
		if let Some(&i) = self.selection.replaces.get(from) {
			let next = Next {
				exec: self,
				from: from + 1,
				depth,
			};
			return self.run(&self.plan.replaces[i], args, None, Some(next));
		}
		let original = match &self.plan.original {
			Some(f) => f.clone(),
			None => self
				.env
				.links
				.original(self.plan.joinpoint)
				.ok_or_else(|| LinkageError::OriginalNotLinked(self.plan.key.to_string()))?,
		};
		original(&Call {
			receiver: self.receiver,
			bound_method: self.bound_method,
			args,
		})
	}

	fn run(
		&self,
		step: &PlanStep,
		args: &[Value],
		result: Option<&Value>,
		next: Option<Next<'_>>,
	) -> Result<Value, Fault> {
		let advice = step.resolve_advice(self.env.links)?;
		let role = if step.lifts() {
			let lifting = step.resolve_lifting(self.env.links)?;
			lifting(&step.entry.instance, self.receiver)?
		} else {
			Value::Unit
		};
		advice(&AdviceCall {
			instance: &step.entry.instance,
			binding: &step.entry.binding,
			role: &role,
			receiver: self.receiver,
			args,
			result,
			next,
		})
	}
}

/// Builds [`DispatchPlan`]s from the current registry and joinpoint state.
pub struct DispatchComposer<'a> {
	pub registry: &'a BindingRegistry,
	pub table: &'a JoinPointTable,
	pub links: &'a LinkTable,
	pub config: &'a RuntimeConfig,
	/// Bumped whenever links or precedence change.
	pub epoch: &'a Generation,
}

impl DispatchComposer<'_> {
	/// Composes the plan for `jp` from a consistent snapshot of its active list.
	///
	/// With eager linking every link the plan may need is resolved here, so a broken
	/// joinpoint fails on its first invocation.
	pub fn compose(&self, jp: JoinPointId) -> Result<DispatchPlan, LinkageError> {
		let epoch = self.epoch.observe();
		let (stamp, active) = self.table.observe(jp)?;
		let token = InvalidationToken::from_stamps([stamp, epoch]);
		let key = self.table.key(jp).ok_or(LinkageError::UnknownJoinPoint(jp))?;
		let snap = self.registry.snapshot();

		let mut entries: Vec<ActiveEntry> = active.iter().filter(|e| e.binding.kind.is_advice()).cloned().collect();
		// Stable: entries with equal precedence keep newest-registered first.
		snap.sort_by_precedence(&mut entries, |e| &*e.binding);

		let eager = self.config.eager_linking;
		let mut plan = DispatchPlan {
			joinpoint: jp,
			key,
			before: Vec::new(),
			replaces: Vec::new(),
			after: Vec::new(),
			original: self.links.original(jp),
			token,
		};
		for entry in entries {
			let mut step = PlanStep {
				aggregate_name: Arc::from(snap.aggregate_name(entry.binding.aggregate)),
				entry,
				advice: None,
				lifting: None,
			};
			match step.resolve_advice(self.links) {
				Ok(f) => step.advice = Some(f),
				Err(e) if eager => return Err(e),
				Err(_) => {}
			}
			if step.lifts() {
				match step.resolve_lifting(self.links) {
					Ok(f) => step.lifting = Some(f),
					Err(e) if eager => return Err(e),
					Err(_) => {}
				}
			}
			match step.entry.binding.kind {
				BindingKind::Before => plan.before.push(step),
				BindingKind::After => plan.after.push(step),
				_ => plan.replaces.push(step),
			}
		}
		if eager && plan.original.is_none() {
			return Err(LinkageError::OriginalNotLinked(plan.key.to_string()));
		}

		trace!(
			joinpoint = %plan.key,
			before = plan.before.len(),
			replaces = plan.replaces.len(),
			after = plan.after.len(),
			generation = ?plan.token.generation(),
			"composed dispatch plan"
		);
		Ok(plan)
	}
}
