//! Shared fixtures for runtime tests.

use std::sync::Arc;

use parking_lot::Mutex;
use weave_primitives::{AggregateId, BindingId, BoundMethodId, ContextId, JoinPointId, MemberDescriptor, Value};
use weave_registry::{AdviceMember, Binding, BindingKind};

use crate::{AggregateInstance, CallSite, DispatchRuntime, Fault, RuntimeConfig};

pub(crate) const TARGET: &str = "app.Foo.bar(J)J";
pub(crate) const CLASS: &str = "app.Foo";

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

/// Runtime with one linked joinpoint whose original body doubles its argument.
pub(crate) struct Fixture {
	pub rt: DispatchRuntime,
	pub log: Log,
	pub jp: JoinPointId,
	pub site: CallSite,
}

impl Fixture {
	pub fn new() -> Self {
		Self::with_config(RuntimeConfig::default())
	}

	pub fn with_config(config: RuntimeConfig) -> Self {
		let rt = DispatchRuntime::with_config(config);
		let log = Log::default();
		let jp = rt.joinpoint_id(TARGET).unwrap();
		let sink = log.clone();
		rt.link_original(jp, move |call| {
			sink.lock().push("original".into());
			Ok(Value::Int(call.args[0].as_int().unwrap_or(0) * 2))
		})
		.unwrap();
		let site = rt.call_site(TARGET, BoundMethodId(0)).unwrap();
		Self { rt, log, jp, site }
	}

	/// Declares an aggregate with a lifting for the target class.
	pub fn aggregate(&self, name: &str) -> AggregateId {
		let agg = self.rt.declare_aggregate(name, None).unwrap();
		self.rt.link_lifting(agg, CLASS, |_, receiver| Ok(receiver.clone()));
		agg
	}

	pub fn binding(&self, agg: AggregateId, kind: BindingKind, id: u32, label: Option<&str>) -> Binding {
		let binding = Binding::advice(
			kind,
			agg,
			MemberDescriptor::parse(TARGET).unwrap(),
			AdviceMember::new("Role", &format!("{kind}{id}"), "(J)J"),
			BindingId(id),
		);
		match label {
			Some(label) => binding.with_label(label),
			None => binding,
		}
	}

	/// Registers advice that logs `"<aggregate>:<kind><id>"`. Replace advice return `1000 + id`.
	pub fn advice(&self, agg: AggregateId, kind: BindingKind, id: u32, label: Option<&str>) {
		self.rt
			.register_aggregate_bindings(agg, [self.binding(agg, kind, id, label)])
			.unwrap();
		let name = self.rt.registry().snapshot().aggregate_name(agg).to_string();
		let sink = self.log.clone();
		self.rt.link_advice(agg, BindingId(id), move |_| {
			sink.lock().push(format!("{name}:{kind}{id}"));
			Ok(match kind {
				BindingKind::Replace => Value::Int(1000 + i64::from(id)),
				_ => Value::Unit,
			})
		});
	}

	/// Registers replace advice that logs and delegates to the next handler with `arg + 1`.
	pub fn replace_calling_next(&self, agg: AggregateId, id: u32) {
		self.rt
			.register_aggregate_bindings(agg, [self.binding(agg, BindingKind::Replace, id, None)])
			.unwrap();
		let name = self.rt.registry().snapshot().aggregate_name(agg).to_string();
		let sink = self.log.clone();
		self.rt.link_advice(agg, BindingId(id), move |call| {
			sink.lock().push(format!("{name}:next{id}"));
			let arg = call.args()[0].as_int().unwrap_or(0);
			call.call_next(&[Value::Int(arg + 1)])
		});
	}

	pub fn instance(&self, agg: AggregateId) -> AggregateInstance {
		self.rt.instantiate(agg, Value::Unit).unwrap()
	}

	/// Instantiates `agg` and activates it for every context.
	pub fn activate(&self, agg: AggregateId) -> AggregateInstance {
		let inst = self.instance(agg);
		self.rt.activate(&inst, ContextId::ALL).unwrap();
		inst
	}

	pub fn invoke(&self, arg: i64) -> Result<Value, Fault> {
		self.site.invoke(&Value::str("receiver"), &[Value::Int(arg)])
	}

	pub fn take_log(&self) -> Vec<String> {
		std::mem::take(&mut *self.log.lock())
	}
}
