//! Joinpoint keys and member descriptors.
//!
//! A joinpoint is addressed textually as `boundClass.memberName(parameterTypes)`. The
//! return type is not part of the key: `Foo.bar()V` and `Foo.bar()` name the same
//! joinpoint, so call sites and binding metadata agree even when only one side carries it.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

/// Malformed joinpoint descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
	#[error("descriptor {0:?} has no parameter list")]
	MissingParameters(String),
	#[error("descriptor {0:?} has an unterminated parameter list")]
	Unterminated(String),
	#[error("descriptor {0:?} has no declaring class")]
	MissingClass(String),
	#[error("descriptor {0:?} has an empty member name")]
	EmptyMember(String),
}

bitflags! {
	/// Flags describing a bound member.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
	pub struct MemberFlags: u16 {
		/// Member is itself a callin method.
		const CALLIN = 1;
		/// Static member; dispatch is keyed by the declaring class.
		const STATIC = 2;
		const FINAL = 4;
		const PRIVATE = 8;
	}
}

/// A class member: declaring class, member name, and JVM-style signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberDescriptor {
	pub class: Arc<str>,
	pub member: Arc<str>,
	pub signature: Arc<str>,
}

impl MemberDescriptor {
	/// Creates a descriptor. Slashes in the class name are normalized to dots.
	pub fn new(class: &str, member: &str, signature: &str) -> Self {
		Self {
			class: normalize_class(class),
			member: Arc::from(member),
			signature: Arc::from(signature),
		}
	}

	/// Parses `class.member(params)ret`.
	pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
		let open = descriptor
			.find('(')
			.ok_or_else(|| DescriptorError::MissingParameters(descriptor.to_string()))?;
		if !descriptor[open..].contains(')') {
			return Err(DescriptorError::Unterminated(descriptor.to_string()));
		}
		let head = &descriptor[..open];
		let dot = head
			.rfind('.')
			.ok_or_else(|| DescriptorError::MissingClass(descriptor.to_string()))?;
		let (class, member) = (&head[..dot], &head[dot + 1..]);
		if class.is_empty() {
			return Err(DescriptorError::MissingClass(descriptor.to_string()));
		}
		if member.is_empty() {
			return Err(DescriptorError::EmptyMember(descriptor.to_string()));
		}
		Ok(Self::new(class, member, &descriptor[open..]))
	}

	/// Returns the parameter part of the signature, including parentheses.
	pub fn parameters(&self) -> &str {
		match self.signature.find(')') {
			Some(close) => &self.signature[..=close],
			None => &self.signature,
		}
	}

	/// Returns the joinpoint key of this member in its declaring class.
	pub fn joinpoint_key(&self) -> JoinPointKey {
		JoinPointKey(Arc::from(format!("{}.{}{}", self.class, self.member, self.parameters())))
	}

	/// Returns the same member as seen from another class (used for inherited joinpoints).
	pub fn in_class(&self, class: &str) -> Self {
		Self {
			class: normalize_class(class),
			member: self.member.clone(),
			signature: self.signature.clone(),
		}
	}
}

impl fmt::Display for MemberDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}{}", self.class, self.member, self.signature)
	}
}

/// Normalized joinpoint key (`class.member(params)`), the input to joinpoint id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinPointKey(Arc<str>);

impl JoinPointKey {
	/// Parses and normalizes a textual descriptor.
	pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
		MemberDescriptor::parse(descriptor).map(|m| m.joinpoint_key())
	}

	/// Returns the normalized key.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for JoinPointKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::borrow::Borrow<str> for JoinPointKey {
	fn borrow(&self) -> &str {
		&self.0
	}
}

fn normalize_class(class: &str) -> Arc<str> {
	if class.contains('/') {
		Arc::from(class.replace('/', "."))
	} else {
		Arc::from(class)
	}
}
