//! Lifecycle outcomes

/// Outcome of a lifecycle call on a node or request.
///
/// Ordered so that any `Pending` is smaller than `Done`, and two `Pending`s
/// compare by their ticks, which lets the scheduler fold outcomes with `min`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum Outcome {
	/// Something still needs to happen in `ticks` ticks
	Pending(u64),

	/// Nothing left to wait on.
	///
	/// Either there was nothing to do, or the request involved is no longer
	/// owned by the caller (it was accepted elsewhere or destroyed).
	Done,
}

/// Extension trait to fold an iterator of outcomes into the earliest one
#[extend::ext(name = MinOutcome)]
pub impl<I: Iterator<Item = Outcome>> I {
	/// Returns the smallest outcome, or `Done` if empty
	fn min_outcome(self) -> Outcome {
		self.min().unwrap_or(Outcome::Done)
	}
}
