use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Dynamically typed value passed through dispatch: receivers, arguments, and results.
#[derive(Clone, Default)]
pub enum Value {
	#[default]
	Unit,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Arc<str>),
	List(Arc<[Value]>),
	/// Opaque host object (receivers, lifted role views).
	Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
	/// Wraps a host object.
	pub fn object<T: Any + Send + Sync>(value: T) -> Self {
		Self::Object(Arc::new(value))
	}

	/// Wraps a string.
	pub fn str(s: &str) -> Self {
		Self::Str(Arc::from(s))
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	/// Downcasts an object value.
	pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
		match self {
			Self::Object(obj) => obj.downcast_ref::<T>(),
			_ => None,
		}
	}

	/// Returns true for [`Value::Unit`].
	pub fn is_unit(&self) -> bool {
		matches!(self, Self::Unit)
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Unit, Self::Unit) => true,
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => a == b,
			(Self::Str(a), Self::Str(b)) => a == b,
			(Self::List(a), Self::List(b)) => a == b,
			(Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Unit => f.write_str("()"),
			Self::Bool(b) => write!(f, "{b}"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Float(x) => write!(f, "{x}"),
			Self::Str(s) => write!(f, "{s:?}"),
			Self::List(items) => f.debug_list().entries(items.iter()).finish(),
			Self::Object(obj) => write!(f, "<object@{:p}>", Arc::as_ptr(obj)),
		}
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Self::Int(v)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Self::Bool(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Self::str(v)
	}
}

impl From<()> for Value {
	fn from(_: ()) -> Self {
		Self::Unit
	}
}
