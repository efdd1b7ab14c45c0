// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for authentication rounds.
#[derive(Debug, Default)]
pub struct AuthMetrics {
	rounds: AtomicU64,
	joins: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl AuthMetrics {
	/// Returns the number of authentication rounds started (one network call each).
	pub fn rounds(&self) -> u64 {
		self.rounds.load(Ordering::Relaxed)
	}

	/// Returns how many callers waited on a round another caller started.
	pub fn joins(&self) -> u64 {
		self.joins.load(Ordering::Relaxed)
	}

	/// Returns the number of rounds that produced a credential.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of rounds that failed or were abandoned.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_round(&self) {
		self.rounds.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_join(&self) {
		self.joins.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}
