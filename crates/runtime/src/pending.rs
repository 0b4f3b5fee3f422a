//! Deferred registry tasks.
//!
//! Work scheduled against something that does not exist yet (a placeholder subclass, a class
//! that has not been loaded) waits here and is replayed opportunistically. A task that fails
//! stays queued for the next replay unless a retry bound is configured.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::LinkageError;
use crate::joinpoint::JoinPointTable;

/// Result of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
	/// The task completed and leaves the queue.
	Done,
	/// Its precondition does not hold yet; try again on the next replay.
	Waiting,
}

/// A deferred unit of work.
pub type PendingFn = Box<dyn FnMut(&JoinPointTable) -> Result<TaskStatus, LinkageError> + Send>;

struct PendingTask {
	label: String,
	failures: u32,
	run: PendingFn,
}

/// Counts from one [`PendingTasks::replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
	pub completed: usize,
	pub waiting: usize,
	pub failed: usize,
	pub dropped: usize,
}

#[derive(Default)]
pub struct PendingTasks {
	queue: Mutex<Vec<PendingTask>>,
}

impl PendingTasks {
	pub fn push(&self, label: impl Into<String>, run: PendingFn) {
		let label = label.into();
		debug!(task = %label, "deferred task");
		self.queue.lock().push(PendingTask {
			label,
			failures: 0,
			run,
		});
	}

	pub fn len(&self) -> usize {
		self.queue.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.lock().is_empty()
	}

	/// Runs every queued task once, in queue order.
	///
	/// Tasks may queue further tasks while running; those wait for the next replay.
	pub fn replay(&self, table: &JoinPointTable, max_retries: Option<u32>) -> ReplayReport {
		let tasks = std::mem::take(&mut *self.queue.lock());
		let mut report = ReplayReport::default();
		let mut kept = Vec::with_capacity(tasks.len());

		for mut task in tasks {
			match (task.run)(table) {
				Ok(TaskStatus::Done) => report.completed += 1,
				Ok(TaskStatus::Waiting) => {
					report.waiting += 1;
					kept.push(task);
				}
				Err(error) => {
					task.failures += 1;
					if max_retries.is_some_and(|max| task.failures >= max) {
						warn!(task = %task.label, failures = task.failures, %error, "dropping pending task");
						report.dropped += 1;
					} else {
						warn!(task = %task.label, failures = task.failures, %error, "pending task failed, keeping it");
						report.failed += 1;
						kept.push(task);
					}
				}
			}
		}

		let mut queue = self.queue.lock();
		kept.append(&mut queue);
		*queue = kept;
		report
	}
}
