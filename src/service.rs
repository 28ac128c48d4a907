// ---------------------------------------------------------------------------
// RecommenderService — queued ingestion over an exclusively-locked model
// ---------------------------------------------------------------------------
//
// Visits land in an UpdateQueue behind a narrow mutex; a background task
// drains batches into the model on a poll interval. Model mutation and reads
// both go through a second mutex holding the model itself, so readers never
// observe a half-merged generation. Lock order is queue before model; no
// path takes them in the other order.
//
// The queue applies back-pressure: once it holds twice the batch size the
// recording call flushes inline instead of waiting for the next poll.
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ServiceConfig;
use crate::error::RecommendError;
use crate::model::CooccurrenceModel;
use crate::queue::UpdateQueue;
use crate::snapshot::{self, SnapshotError};
use crate::tagspace::TagSpace;
use crate::types::{ScoredTag, ServiceInfo, TagHistoryItem, VisitEvent};

pub struct RecommenderService {
	config: ServiceConfig,
	model: Arc<Mutex<Option<CooccurrenceModel>>>,
	queue: Arc<Mutex<UpdateQueue>>,
	/// Set once `initialize` has installed a model; lets the enqueue paths
	/// reject early without contending on the model mutex.
	initialized: AtomicBool,
	stop_tx: watch::Sender<bool>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecommenderService {
	pub fn new(config: ServiceConfig) -> Self {
		let (stop_tx, _stop_rx) = watch::channel(false);
		Self {
			config,
			model: Arc::new(Mutex::new(None)),
			queue: Arc::new(Mutex::new(UpdateQueue::new())),
			initialized: AtomicBool::new(false),
			stop_tx,
			worker: Mutex::new(None),
		}
	}

	// -- Lifecycle ------------------------------------------------------------

	/// Build (or rebuild) the model over the given vocabulary, restoring
	/// persisted state from the snapshot when one is configured.
	///
	/// Re-initializing with the current vocabulary is a no-op; a different
	/// vocabulary replaces the model. A snapshot that fails to load falls
	/// back to a fresh model over `tags` — unless no vocabulary was given,
	/// in which case the snapshot was the only source and the error
	/// propagates.
	pub async fn initialize(&self, tags: Vec<String>) -> Result<(), RecommendError> {
		let tag_space = TagSpace::new(tags);

		let mut guard = self.model.lock().await;
		if let Some(existing) = guard.as_ref() {
			if !tag_space.is_empty() && existing.tag_space().tags() == tag_space.tags() {
				tracing::debug!("Already initialized with this vocabulary");
				return Ok(());
			}
		}

		let model = self.build_model(tag_space)?;
		tracing::info!(
			tags = model.tag_space().len(),
			total_visits = model.total_visits(),
			"Recommender initialized"
		);
		*guard = Some(model);
		self.initialized.store(true, Ordering::Release);
		Ok(())
	}

	fn build_model(&self, tag_space: TagSpace) -> Result<CooccurrenceModel, RecommendError> {
		if let Some(path) = &self.config.snapshot_path {
			match snapshot::load(path) {
				Ok(data) => {
					let expected = (!tag_space.is_empty()).then_some(&tag_space);
					match CooccurrenceModel::from_snapshot(data, expected) {
						Ok(model) => {
							tracing::info!(path = %path.display(), "Model restored from snapshot");
							return Ok(model);
						}
						Err(e) if tag_space.is_empty() => return Err(e.into()),
						Err(e) => {
							tracing::warn!(path = %path.display(), error = %e, "Snapshot rejected, starting fresh");
						}
					}
				}
				Err(SnapshotError::Missing(_)) => {
					tracing::info!(path = %path.display(), "No snapshot yet, starting fresh");
				}
				Err(e) if tag_space.is_empty() => return Err(e.into()),
				Err(e) => {
					tracing::warn!(path = %path.display(), error = %e, "Snapshot load failed, starting fresh");
				}
			}
		}

		if tag_space.is_empty() {
			return Err(RecommendError::EmptyVocabulary);
		}
		Ok(CooccurrenceModel::new(tag_space))
	}

	/// Spawn the background flush task. Safe to call once; later calls on a
	/// running service are no-ops.
	pub async fn start(&self) {
		let mut worker = self.worker.lock().await;
		if worker.is_some() {
			return;
		}

		let queue = Arc::clone(&self.queue);
		let model = Arc::clone(&self.model);
		let snapshot_path = self.config.snapshot_path.clone();
		let batch_size = self.config.batch_size;
		let poll_interval = self.config.poll_interval;
		let mut stop_rx = self.stop_tx.subscribe();

		*worker = Some(tokio::spawn(async move {
			let mut interval = tokio::time::interval(poll_interval);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = interval.tick() => {
						flush_once(&queue, &model, &snapshot_path, batch_size, false).await;
					}
					changed = stop_rx.changed() => {
						if changed.is_err() || *stop_rx.borrow() {
							break;
						}
					}
				}
			}
			tracing::debug!("Background flush task stopped");
		}));
		tracing::info!(
			batch_size,
			poll_interval_ms = poll_interval.as_millis() as u64,
			"Background flush task started"
		);
	}

	/// Stop the background task, waiting up to the configured timeout, then
	/// drain whatever is still queued and persist the final state.
	pub async fn stop(&self) {
		let _ = self.stop_tx.send(true);

		let handle = self.worker.lock().await.take();
		if let Some(handle) = handle {
			let abort = handle.abort_handle();
			if tokio::time::timeout(self.config.stop_timeout, handle)
				.await
				.is_err()
			{
				tracing::warn!("Background flush task did not stop in time, aborting");
				abort.abort();
			}
		}

		let merged = self.flush(true).await;
		if merged > 0 {
			tracing::info!(merged, "Drained pending visits on shutdown");
		}

		let guard = self.model.lock().await;
		if let Some(model) = guard.as_ref() {
			persist(model, &self.config.snapshot_path);
		}
	}

	// -- Ingestion ------------------------------------------------------------

	/// Queue one visit. Returns the pending queue length after the push.
	/// Flushes inline when the queue reaches twice the batch size.
	pub async fn record_visit(&self, visit: VisitEvent) -> Result<usize, RecommendError> {
		self.ensure_initialized()?;

		let pending = {
			let mut queue = self.queue.lock().await;
			queue.push(visit);
			queue.len()
		};

		if pending >= self.config.batch_size * 2 {
			tracing::debug!(pending, "Queue pressure, flushing inline");
			self.flush(true).await;
		}
		Ok(pending)
	}

	/// Queue a user's aggregated history, expanded back into one visit per
	/// count. Returns the pending queue length after the push.
	pub async fn update_from_history(
		&self,
		user: &str,
		history: &[TagHistoryItem],
	) -> Result<usize, RecommendError> {
		self.ensure_initialized()?;

		let pending = {
			let mut queue = self.queue.lock().await;
			for item in history {
				queue.extend((0..item.count).map(|_| VisitEvent {
					user: user.to_string(),
					tag: item.tag.clone(),
				}));
			}
			queue.len()
		};

		if pending >= self.config.batch_size * 2 {
			tracing::debug!(pending, "Queue pressure, flushing inline");
			self.flush(true).await;
		}
		Ok(pending)
	}

	/// Merge everything queued right now. Returns the number of merged visits.
	pub async fn force_update(&self) -> Result<usize, RecommendError> {
		self.ensure_initialized()?;
		Ok(self.flush(true).await)
	}

	/// Full retrain from the given visits. The pending queue is cleared
	/// first: a retrain supersedes whatever was still waiting to merge.
	/// Returns the number of events skipped for being outside the vocabulary.
	pub async fn train(&self, visits: &[VisitEvent]) -> Result<usize, RecommendError> {
		let discarded = self.queue.lock().await.drain_all().len();
		if discarded > 0 {
			tracing::debug!(discarded, "Cleared pending queue before retrain");
		}

		let mut guard = self.model.lock().await;
		let model = guard.as_mut().ok_or(RecommendError::NotInitialized)?;
		let skipped = model.fit(visits);
		persist(model, &self.config.snapshot_path);
		Ok(skipped)
	}

	// -- Queries --------------------------------------------------------------

	pub async fn recommend(
		&self,
		history: &[TagHistoryItem],
		top_n: usize,
	) -> Result<Vec<ScoredTag>, RecommendError> {
		let mut guard = self.model.lock().await;
		let model = guard.as_mut().ok_or(RecommendError::NotInitialized)?;
		Ok(model.recommend(history, top_n))
	}

	pub async fn info(&self) -> Result<ServiceInfo, RecommendError> {
		let pending_updates = self.queue.lock().await.len();
		let mut guard = self.model.lock().await;
		let model = guard.as_mut().ok_or(RecommendError::NotInitialized)?;
		Ok(ServiceInfo {
			model: model.info(),
			pending_updates,
		})
	}

	// -- Internals ------------------------------------------------------------

	fn ensure_initialized(&self) -> Result<(), RecommendError> {
		if !self.initialized.load(Ordering::Acquire) {
			return Err(RecommendError::NotInitialized);
		}
		Ok(())
	}

	async fn flush(&self, drain_all: bool) -> usize {
		flush_once(
			&self.queue,
			&self.model,
			&self.config.snapshot_path,
			self.config.batch_size,
			drain_all,
		)
		.await
	}
}

/// Drain the queue and merge into the model. A polled flush takes exactly
/// one batch, and only once a full batch has accumulated — this bounds
/// per-tick latency and leaves short queues for the next tick or the final
/// drain. A forced flush takes everything. The queue lock is released
/// before the model lock is taken.
async fn flush_once(
	queue: &Mutex<UpdateQueue>,
	model: &Mutex<Option<CooccurrenceModel>>,
	snapshot_path: &Option<PathBuf>,
	batch_size: usize,
	drain_all: bool,
) -> usize {
	let batch = {
		let mut queue = queue.lock().await;
		if queue.is_empty() || (!drain_all && queue.len() < batch_size) {
			return 0;
		}
		if drain_all {
			queue.drain_all()
		} else {
			queue.drain_batch(batch_size)
		}
	};

	let mut guard = model.lock().await;
	// Visits are only queued after initialize, so the model is present
	// whenever the queue was non-empty.
	let Some(model) = guard.as_mut() else {
		tracing::error!(dropped = batch.len(), "Flush with no model, dropping batch");
		return 0;
	};

	let merged = batch.len();
	model.update(&batch);
	persist(model, snapshot_path);
	merged
}

/// Write the current model state to the snapshot path, if one is configured.
/// Persistence failures are logged and never fail the merge that produced
/// the state.
fn persist(model: &CooccurrenceModel, snapshot_path: &Option<PathBuf>) {
	let Some(path) = snapshot_path else {
		return;
	};
	if let Err(e) = snapshot::save(path, &model.to_snapshot()) {
		tracing::error!(path = %path.display(), error = %e, "Failed to persist snapshot");
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
