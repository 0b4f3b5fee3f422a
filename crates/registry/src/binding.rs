//! Binding descriptors: one interceptor (or access grant) declared by an aggregate.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weave_primitives::{AggregateId, BindingId, GlobalId, JoinPointKey, MemberDescriptor, MemberFlags};

/// What a binding does at its target member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
	/// Advice run before the target, observing the arguments.
	Before,
	/// Advice run after the target, observing the result.
	After,
	/// Advice run instead of the target.
	Replace,
	/// Decapsulated field access.
	FieldAccess,
	/// Decapsulated method access.
	MethodAccess,
	/// Associates the aggregate's role view with a base class.
	AggregateAssociation,
}

impl BindingKind {
	/// Returns true for the kinds that take part in dispatch (before/after/replace).
	pub const fn is_advice(self) -> bool {
		matches!(self, Self::Before | Self::After | Self::Replace)
	}

	/// Returns true for field and method access bindings.
	pub const fn is_access(self) -> bool {
		matches!(self, Self::FieldAccess | Self::MethodAccess)
	}

	/// Sort rank used by precedence ordering: before/after, then replace, then the rest.
	pub(crate) const fn precedence_rank(self) -> u8 {
		match self {
			Self::Before | Self::After => 0,
			Self::Replace => 1,
			Self::FieldAccess | Self::MethodAccess | Self::AggregateAssociation => 2,
		}
	}
}

impl fmt::Display for BindingKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Before => "before",
			Self::After => "after",
			Self::Replace => "replace",
			Self::FieldAccess => "field-access",
			Self::MethodAccess => "method-access",
			Self::AggregateAssociation => "aggregate-association",
		})
	}
}

/// The aggregate-side member invoked by advice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdviceMember {
	/// Role type declaring the advice inside the aggregate.
	pub role: Arc<str>,
	pub name: Arc<str>,
	pub signature: Arc<str>,
}

impl AdviceMember {
	pub fn new(role: &str, name: &str, signature: &str) -> Self {
		Self {
			role: Arc::from(role),
			name: Arc::from(name),
			signature: Arc::from(signature),
		}
	}
}

/// One immutable binding declared by an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
	pub kind: BindingKind,
	pub aggregate: AggregateId,
	/// Target member as declared by the bound class.
	pub target: MemberDescriptor,
	/// Class actually declaring the target member, when it differs from the bound class.
	pub declaring_class: Option<Arc<str>>,
	pub flags: MemberFlags,
	/// Advice member; present exactly for advice kinds.
	pub advice: Option<AdviceMember>,
	/// Precedence label, local to the owning aggregate.
	pub label: Option<Arc<str>>,
	/// Callin id for advice, per-aggregate access id for access bindings.
	pub local_id: BindingId,
	/// Global member id for access bindings. Assigned on registration when absent.
	pub global_id: Option<GlobalId>,
	pub handle_covariant_return: bool,
	pub requires_base_super_call: bool,
}

impl Binding {
	/// Creates an advice binding of the given kind.
	pub fn advice(
		kind: BindingKind,
		aggregate: AggregateId,
		target: MemberDescriptor,
		advice: AdviceMember,
		local_id: BindingId,
	) -> Self {
		debug_assert!(kind.is_advice());
		Self {
			kind,
			aggregate,
			target,
			declaring_class: None,
			flags: MemberFlags::empty(),
			advice: Some(advice),
			label: None,
			local_id,
			global_id: None,
			handle_covariant_return: false,
			requires_base_super_call: false,
		}
	}

	/// Creates a field or method access binding.
	pub fn access(
		kind: BindingKind,
		aggregate: AggregateId,
		target: MemberDescriptor,
		access_id: BindingId,
	) -> Self {
		debug_assert!(kind.is_access());
		Self {
			kind,
			aggregate,
			target,
			declaring_class: None,
			flags: MemberFlags::empty(),
			advice: None,
			label: None,
			local_id: access_id,
			global_id: None,
			handle_covariant_return: false,
			requires_base_super_call: false,
		}
	}

	/// Creates an association between the aggregate and a base class.
	pub fn association(aggregate: AggregateId, class: &str, local_id: BindingId) -> Self {
		Self {
			kind: BindingKind::AggregateAssociation,
			aggregate,
			target: MemberDescriptor::new(class, "", ""),
			declaring_class: None,
			flags: MemberFlags::empty(),
			advice: None,
			label: None,
			local_id,
			global_id: None,
			handle_covariant_return: false,
			requires_base_super_call: false,
		}
	}

	pub fn with_label(mut self, label: &str) -> Self {
		self.label = Some(Arc::from(label));
		self
	}

	pub fn with_flags(mut self, flags: MemberFlags) -> Self {
		self.flags = flags;
		self
	}

	pub fn with_declaring_class(mut self, class: &str) -> Self {
		self.declaring_class = Some(Arc::from(class.replace('/', ".")));
		self
	}

	pub fn with_global_id(mut self, id: GlobalId) -> Self {
		self.global_id = Some(id);
		self
	}

	/// Class whose joinpoint this binding attaches to.
	///
	/// Static members cannot be woven into subclasses, so they stay keyed by the declaring class.
	pub fn weavable_class(&self) -> &str {
		match &self.declaring_class {
			Some(declaring) if self.flags.contains(MemberFlags::STATIC) => declaring,
			_ => &self.target.class,
		}
	}

	/// Joinpoint key this binding registers on.
	pub fn joinpoint_key(&self) -> JoinPointKey {
		if self.weavable_class() == &*self.target.class {
			self.target.joinpoint_key()
		} else {
			self.target.in_class(self.weavable_class()).joinpoint_key()
		}
	}
}

impl fmt::Display for Binding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {{{}}} {}", self.kind, self.local_id, self.target)
	}
}
