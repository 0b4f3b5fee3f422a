use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier backed by a dense index into an arena.
pub trait DenseId: Copy + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static {
	/// Builds the id from its raw index.
	fn from_u32(raw: u32) -> Self;
	/// Returns the raw index.
	fn as_u32(self) -> u32;

	/// Returns the raw index as `usize` for slice access.
	#[inline]
	fn index(self) -> usize {
		self.as_u32() as usize
	}
}

macro_rules! dense_id {
	($(#[$meta:meta])* $name:ident, $prefix:literal) => {
		$(#[$meta])*
		#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub u32);

		impl DenseId for $name {
			#[inline]
			fn from_u32(raw: u32) -> Self {
				Self(raw)
			}

			#[inline]
			fn as_u32(self) -> u32 {
				self.0
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, concat!($prefix, "#{}"), self.0)
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}
	};
}

dense_id!(
	/// Process-wide joinpoint id. Assigned once per distinct descriptor, never reused.
	JoinPointId,
	"jp"
);
dense_id!(
	/// Dense id of a registered aggregate type.
	AggregateId,
	"agg"
);
dense_id!(
	/// Binding id local to its owning aggregate (callin id or per-aggregate access id).
	BindingId,
	"binding"
);
dense_id!(
	/// Globally unique member id used by access bindings.
	GlobalId,
	"member"
);
dense_id!(
	/// Provisional subclass that has not been resolved to a concrete class yet.
	PlaceholderId,
	"placeholder"
);

/// Local dispatch-table index the rewritten trampoline passes back into the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BoundMethodId(pub i32);

/// Identity of one aggregate instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

impl fmt::Debug for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "instance#{}", self.0)
	}
}

/// Execution context an aggregate instance can be activated for.
///
/// One context per thread is the usual mapping; [`ContextId::current`] hands out a
/// stable id for the calling thread. [`ContextId::ALL`] addresses every context at once.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
	static CURRENT_CONTEXT: Cell<u64> = const { Cell::new(0) };
}

impl ContextId {
	/// Matches every execution context.
	pub const ALL: Self = Self(0);

	/// Returns the context id of the calling thread, assigning one on first use.
	pub fn current() -> Self {
		CURRENT_CONTEXT.with(|cell| {
			let mut id = cell.get();
			if id == 0 {
				id = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
				cell.set(id);
			}
			Self(id)
		})
	}

	/// Builds a context id from a raw value. `0` is reserved for [`ContextId::ALL`].
	pub const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	/// Returns the raw value.
	pub const fn raw(self) -> u64 {
		self.0
	}

	/// Returns true for the all-contexts wildcard.
	pub const fn is_all(self) -> bool {
		self.0 == 0
	}
}

impl fmt::Debug for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_all() {
			f.write_str("ctx#all")
		} else {
			write!(f, "ctx#{}", self.0)
		}
	}
}
