// self
use crate::obs::{OpKind, OpOutcome};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"openstack_core_op_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_op_outcome_noop_without_metrics() {
		record_op_outcome(OpKind::Paginate, OpOutcome::Failure);
	}

	#[test]
	fn outcome_follows_the_result() {
		assert_eq!(OpOutcome::of::<_, ()>(&Ok(1)), OpOutcome::Success);
		assert_eq!(OpOutcome::of::<(), _>(&Err("boom")), OpOutcome::Failure);
	}
}
