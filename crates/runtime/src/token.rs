//! Generation-based invalidation tokens.
//!
//! Every joinpoint owns a [`Generation`] counter. A token remembers the values it observed
//! when a plan was composed; bumping any observed counter retires the token for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Monotonic invalidation counter shared by the tokens that observe it.
#[derive(Debug, Default, Clone)]
pub struct Generation {
	value: Arc<AtomicU64>,
}

impl Generation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current generation.
	#[inline]
	pub fn current(&self) -> u64 {
		self.value.load(Ordering::Acquire)
	}

	/// Retires every token observing this counter and returns the new generation.
	pub fn bump(&self) -> u64 {
		self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Snapshot of the current generation.
	pub fn observe(&self) -> Stamp {
		Stamp {
			value: self.value.clone(),
			seen: self.current(),
		}
	}
}

/// One observed generation.
#[derive(Debug, Clone)]
pub struct Stamp {
	value: Arc<AtomicU64>,
	seen: u64,
}

impl Stamp {
	#[inline]
	fn is_current(&self) -> bool {
		self.value.load(Ordering::Acquire) == self.seen
	}
}

/// Invalidation token bound to the snapshot a dispatch plan was composed from.
#[derive(Debug, Clone, Default)]
pub struct InvalidationToken {
	/// Empty only for the never-valid token.
	stamps: SmallVec<[Stamp; 2]>,
}

impl InvalidationToken {
	/// A token that is never valid.
	pub fn invalid() -> Self {
		Self::default()
	}

	/// Builds a token observing all given stamps.
	pub fn from_stamps(stamps: impl IntoIterator<Item = Stamp>) -> Self {
		Self {
			stamps: stamps.into_iter().collect(),
		}
	}

	/// Returns true while no observed generation has moved.
	#[inline]
	pub fn is_valid(&self) -> bool {
		!self.stamps.is_empty() && self.stamps.iter().all(Stamp::is_current)
	}

	/// Generation observed for the primary (first) counter.
	pub fn generation(&self) -> Option<u64> {
		self.stamps.first().map(|s| s.seen)
	}
}
