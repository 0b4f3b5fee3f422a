//! Serialized aggregate metadata, as produced by the compiler for each aggregate class.
//!
//! ```toml
//! name = "Audit"
//! super = "BaseAudit"
//! precedence = [["first", "second"]]
//!
//! [[bindings]]
//! kind = "before"
//! id = 0
//! target = "com.acme.Account.withdraw(J)V"
//! advice = { role = "Watcher", name = "log", signature = "(J)V" }
//! label = "first"
//! ```

use serde::{Deserialize, Serialize};
use weave_primitives::{AggregateId, BindingId, GlobalId, MemberDescriptor, MemberFlags};

use crate::binding::{AdviceMember, Binding, BindingKind};
use crate::error::RegistryError;

/// Metadata of one aggregate class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDescriptor {
	pub name: String,
	#[serde(default, rename = "super")]
	pub super_aggregate: Option<String>,
	/// Precedence sequences declared by the aggregate, highest priority first.
	#[serde(default)]
	pub precedence: Vec<Vec<String>>,
	#[serde(default)]
	pub bindings: Vec<BindingDescriptor>,
}

/// One binding entry of an [`AggregateDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDescriptor {
	pub kind: BindingKind,
	/// Callin id or access id, unique within the aggregate.
	pub id: u32,
	/// `class.member(signature)` for member bindings, a bare class name for associations.
	pub target: String,
	#[serde(default)]
	pub declaring_class: Option<String>,
	#[serde(default)]
	pub advice: Option<AdviceDescriptor>,
	#[serde(default)]
	pub label: Option<String>,
	#[serde(default)]
	pub global_id: Option<u32>,
	#[serde(default)]
	pub flags: Vec<FlagName>,
	#[serde(default)]
	pub covariant_return: bool,
	#[serde(default)]
	pub base_super_call: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceDescriptor {
	pub role: String,
	pub name: String,
	pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagName {
	Callin,
	Static,
	Final,
	Private,
}

impl From<FlagName> for MemberFlags {
	fn from(flag: FlagName) -> Self {
		match flag {
			FlagName::Callin => MemberFlags::CALLIN,
			FlagName::Static => MemberFlags::STATIC,
			FlagName::Final => MemberFlags::FINAL,
			FlagName::Private => MemberFlags::PRIVATE,
		}
	}
}

impl AggregateDescriptor {
	/// Parses a TOML descriptor.
	pub fn from_toml_str(src: &str) -> Result<Self, RegistryError> {
		toml::from_str(src).map_err(|e| RegistryError::Decode(e.to_string()))
	}

	/// Converts binding entries into [`Binding`] values owned by `aggregate`.
	pub fn to_bindings(&self, aggregate: AggregateId) -> Result<Vec<Binding>, RegistryError> {
		self.bindings.iter().map(|b| b.to_binding(&self.name, aggregate)).collect()
	}
}

impl BindingDescriptor {
	fn to_binding(&self, aggregate_name: &str, aggregate: AggregateId) -> Result<Binding, RegistryError> {
		let local_id = BindingId(self.id);
		let mut binding = match self.kind {
			BindingKind::AggregateAssociation => Binding::association(aggregate, &self.target, local_id),
			kind if kind.is_access() => {
				Binding::access(kind, aggregate, MemberDescriptor::parse(&self.target)?, local_id)
			}
			kind => {
				let advice = self.advice.as_ref().ok_or_else(|| RegistryError::MalformedBinding {
					aggregate: aggregate_name.to_string(),
					local_id,
					reason: "advice binding without advice member",
				})?;
				Binding::advice(
					kind,
					aggregate,
					MemberDescriptor::parse(&self.target)?,
					AdviceMember::new(&advice.role, &advice.name, &advice.signature),
					local_id,
				)
			}
		};
		binding.flags = self.flags.iter().fold(MemberFlags::empty(), |acc, f| acc | MemberFlags::from(*f));
		if let Some(class) = &self.declaring_class {
			binding = binding.with_declaring_class(class);
		}
		if let Some(label) = &self.label {
			binding = binding.with_label(label);
		}
		binding.global_id = self.global_id.map(GlobalId);
		binding.handle_covariant_return = self.covariant_return;
		binding.requires_base_super_call = self.base_super_call;
		Ok(binding)
	}
}
