//! Per call-site plan cache.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::trace;
use weave_primitives::{BoundMethodId, ContextId, JoinPointId, Value};

use crate::compose::{Call, DispatchPlan};
use crate::error::{Fault, LinkageError};
use crate::runtime::DispatchRuntime;

/// Cached dispatch entry of one physical call site.
///
/// Invocation reuses the cached plan while its token is valid and recomposes otherwise.
/// Concurrent callers never block each other: a caller may run a plan that was retired
/// a moment ago, and the next call after that recomposes.
pub struct CallSite {
	runtime: DispatchRuntime,
	joinpoint: JoinPointId,
	bound_method: BoundMethodId,
	plan: ArcSwapOption<DispatchPlan>,
}

impl CallSite {
	pub(crate) fn new(runtime: DispatchRuntime, joinpoint: JoinPointId, bound_method: BoundMethodId) -> Self {
		Self {
			runtime,
			joinpoint,
			bound_method,
			plan: ArcSwapOption::empty(),
		}
	}

	pub fn joinpoint(&self) -> JoinPointId {
		self.joinpoint
	}

	pub fn bound_method(&self) -> BoundMethodId {
		self.bound_method
	}

	/// Invokes the joinpoint in the calling thread's context.
	pub fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, Fault> {
		self.invoke_in(ContextId::current(), receiver, args)
	}

	/// Invokes the joinpoint in `ctx`.
	///
	/// Errors raised by advice or the original body come back unchanged. An early
	/// [`Fault::Return`] becomes the invocation's result.
	pub fn invoke_in(&self, ctx: ContextId, receiver: &Value, args: &[Value]) -> Result<Value, Fault> {
		let plan = self.plan()?;
		let env = self.runtime.exec_env(ctx);
		let call = Call {
			receiver,
			bound_method: self.bound_method,
			args,
		};
		match plan.execute(&env, &call) {
			Err(Fault::Return(value)) => Ok(value),
			other => other,
		}
	}

	/// Returns the cached plan if still valid, composing and installing a new one otherwise.
	///
	/// Call-next sub-dispatch runs on the returned plan for the whole invocation, so nested
	/// replace advice observe one stable snapshot.
	pub fn plan(&self) -> Result<Arc<DispatchPlan>, LinkageError> {
		if let Some(plan) = self.plan.load_full()
			&& plan.is_valid()
		{
			return Ok(plan);
		}
		trace!(joinpoint = ?self.joinpoint, "recomposing call site");
		let plan = Arc::new(self.runtime.compose(self.joinpoint)?);
		self.plan.store(Some(plan.clone()));
		Ok(plan)
	}

	/// Returns true if a valid plan is installed.
	pub fn is_cached(&self) -> bool {
		self.plan.load().as_ref().is_some_and(|p| p.is_valid())
	}
}

impl fmt::Debug for CallSite {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallSite")
			.field("joinpoint", &self.joinpoint)
			.field("bound_method", &self.bound_method)
			.field("cached", &self.is_cached())
			.finish()
	}
}
