// ---------------------------------------------------------------------------
// UpdateQueue — FIFO buffer of visit events awaiting a model merge
// ---------------------------------------------------------------------------

use std::collections::VecDeque;

use crate::types::VisitEvent;

/// Pending visits in arrival order. Draining hands batches to the model in
/// the same order they were recorded, so per-user session grouping sees the
/// events as they happened.
#[derive(Debug, Default)]
pub struct UpdateQueue {
	pending: VecDeque<VisitEvent>,
}

impl UpdateQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, visit: VisitEvent) {
		self.pending.push_back(visit);
	}

	pub fn extend<I: IntoIterator<Item = VisitEvent>>(&mut self, visits: I) {
		self.pending.extend(visits);
	}

	pub fn len(&self) -> usize {
		self.pending.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Remove and return up to `max` events from the front.
	pub fn drain_batch(&mut self, max: usize) -> Vec<VisitEvent> {
		let take = max.min(self.pending.len());
		self.pending.drain(..take).collect()
	}

	/// Remove and return everything.
	pub fn drain_all(&mut self) -> Vec<VisitEvent> {
		self.pending.drain(..).collect()
	}
}
