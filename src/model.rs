// ---------------------------------------------------------------------------
// CooccurrenceModel — learned tag co-occurrence state
// ---------------------------------------------------------------------------
//
// Holds per-tag visit counts and a |tags| x |tags| co-occurrence matrix over
// a fixed TagSpace. Two accumulators are kept:
//
//   raw    — unnormalized pair sums, retained across incremental updates
//   matrix — the normalized view, row i = raw row i / tag_counts[i]
//
// Retaining raw sums is what makes `update` associative with `fit`:
// affected rows are always re-derived as raw/count, never re-divided from an
// already-normalized row. Rows with a zero count stay all-zero.
//
// Mutations renormalize inside the same call, so readers only ever observe a
// fully-derived generation. The popularity ordering (cold-start
// recommendations, backfill pool, info top-5) is the one lazily cached
// derived value; every mutation that changes a count drops it.
// ---------------------------------------------------------------------------

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;

use crate::snapshot::{self, ModelSnapshot, SnapshotError, SNAPSHOT_SCHEMA_VERSION};
use crate::tagspace::TagSpace;
use crate::types::{ModelInfo, PopularTag, ScoredTag, TagHistoryItem, VisitEvent};

/// Weight of the co-occurrence score vs. the log-popularity bias in the
/// blended recommendation score.
const SIMILARITY_WEIGHT: f64 = 0.8;
const POPULARITY_WEIGHT: f64 = 0.2;

/// Number of tags reported by `info()`.
const POPULAR_TAGS_IN_INFO: usize = 5;

pub(crate) fn current_timestamp_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CooccurrenceModel {
	tag_space: TagSpace,
	/// Raw pair sums, row-major n x n.
	raw: Vec<f64>,
	/// Normalized view, row-major n x n.
	matrix: Vec<f64>,
	tag_counts: Vec<u64>,
	total_visits: u64,
	version: u64,
	last_updated: u64,
	/// Tag indices sorted by count descending, vocabulary order on ties.
	/// Lazily derived; dropped by every count-changing mutation.
	popularity: Option<Vec<usize>>,
}

impl CooccurrenceModel {
	/// Fresh, untrained model over the given vocabulary.
	pub fn new(tag_space: TagSpace) -> Self {
		let n = tag_space.len();
		Self {
			tag_space,
			raw: vec![0.0; n * n],
			matrix: vec![0.0; n * n],
			tag_counts: vec![0; n],
			total_visits: 0,
			version: 1,
			last_updated: current_timestamp_ms(),
			popularity: None,
		}
	}

	pub fn tag_space(&self) -> &TagSpace {
		&self.tag_space
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn total_visits(&self) -> u64 {
		self.total_visits
	}

	pub fn last_updated(&self) -> u64 {
		self.last_updated
	}

	pub fn tag_count(&self, tag: &str) -> u64 {
		self.tag_space
			.index_of(tag)
			.map_or(0, |i| self.tag_counts[i])
	}

	#[cfg(test)]
	pub(crate) fn matrix_value(&self, row_tag: &str, col_tag: &str) -> f64 {
		let n = self.tag_space.len();
		let i = self.tag_space.index_of(row_tag).unwrap();
		let j = self.tag_space.index_of(col_tag).unwrap();
		self.matrix[i * n + j]
	}

	// -- Accumulation ---------------------------------------------------------

	/// Group visits by user and add their contribution to the raw sums and
	/// counts. Returns the set of affected tag indices and the number of
	/// events skipped because their tag is outside the vocabulary.
	fn accumulate(&mut self, visits: &[VisitEvent]) -> (BTreeSet<usize>, usize) {
		let n = self.tag_space.len();
		let mut by_user: HashMap<&str, Vec<usize>> = HashMap::new();
		let mut skipped = 0usize;

		for visit in visits {
			match self.tag_space.index_of(&visit.tag) {
				Some(idx) => by_user.entry(visit.user.as_str()).or_default().push(idx),
				None => {
					tracing::warn!(tag = %visit.tag, user = %visit.user, "Tag not in vocabulary, skipping");
					skipped += 1;
				}
			}
		}

		let mut affected = BTreeSet::new();
		for indices in by_user.values() {
			for &i in indices {
				self.tag_counts[i] += 1;
				self.total_visits += 1;
				affected.insert(i);
				let row = &mut self.raw[i * n..(i + 1) * n];
				for &j in indices {
					row[j] += 1.0;
				}
			}
		}

		(affected, skipped)
	}

	/// Re-derive one normalized row from the raw sums and the current count.
	fn normalize_row(&mut self, i: usize) {
		let n = self.tag_space.len();
		let count = self.tag_counts[i];
		let row_raw = &self.raw[i * n..(i + 1) * n];
		let row_out = &mut self.matrix[i * n..(i + 1) * n];
		if count == 0 {
			row_out.fill(0.0);
		} else {
			let divisor = count as f64;
			for (out, raw) in row_out.iter_mut().zip(row_raw.iter()) {
				*out = raw / divisor;
			}
		}
	}

	// -- Training -------------------------------------------------------------

	/// Full retrain: discard all learned state and recompute from scratch.
	/// Returns the number of skipped (unknown-tag) events.
	pub fn fit(&mut self, visits: &[VisitEvent]) -> usize {
		tracing::info!(records = visits.len(), "Starting model training");

		let n = self.tag_space.len();
		self.raw.fill(0.0);
		self.matrix.fill(0.0);
		self.tag_counts.fill(0);
		self.total_visits = 0;
		self.popularity = None;

		let (_affected, skipped) = self.accumulate(visits);
		for i in 0..n {
			self.normalize_row(i);
		}

		self.version += 1;
		self.last_updated = current_timestamp_ms();
		tracing::info!(version = self.version, skipped, "Model training completed");
		skipped
	}

	/// Incremental merge: add only the new visits' contribution, then
	/// renormalize the rows whose counts changed. A call that mutates
	/// nothing (empty or entirely-unknown input) leaves the version alone.
	/// Returns the number of skipped (unknown-tag) events.
	pub fn update(&mut self, visits: &[VisitEvent]) -> usize {
		if visits.is_empty() {
			tracing::debug!("No new visits to merge");
			return 0;
		}

		let (affected, skipped) = self.accumulate(visits);
		if affected.is_empty() {
			return skipped;
		}

		for &i in &affected {
			self.normalize_row(i);
		}
		self.popularity = None;

		self.version += 1;
		self.last_updated = current_timestamp_ms();
		tracing::debug!(
			records = visits.len(),
			affected = affected.len(),
			version = self.version,
			"Model updated"
		);
		skipped
	}

	// -- Popularity -----------------------------------------------------------

	fn popularity_order(&mut self) -> &[usize] {
		let counts = &self.tag_counts;
		self.popularity.get_or_insert_with(|| {
			let mut order: Vec<usize> = (0..counts.len()).collect();
			order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
			order
		})
	}

	fn popular_tags(&mut self, top_n: usize) -> Vec<ScoredTag> {
		let order: Vec<usize> = self.popularity_order().iter().copied().take(top_n).collect();
		order
			.into_iter()
			.filter_map(|i| {
				self.tag_space.tag_at(i).map(|tag| ScoredTag {
					tag: tag.to_string(),
					score: self.tag_counts[i] as f64,
				})
			})
			.collect()
	}

	// -- Recommendation -------------------------------------------------------

	/// Recommend up to `top_n` tags the user has not visited.
	///
	/// Empty or entirely-unknown history falls back to global popularity.
	/// Otherwise scores are the user's normalized history weights dotted
	/// with the co-occurrence matrix, blended with log-popularity; ties
	/// break in vocabulary order, and the remaining slots are backfilled
	/// with unvisited tags in randomized order.
	pub fn recommend(&mut self, history: &[TagHistoryItem], top_n: usize) -> Vec<ScoredTag> {
		let n = self.tag_space.len();
		if top_n == 0 || n == 0 {
			return Vec::new();
		}

		// Collect the known part of the history; unknown tags are soft errors.
		let mut visited: BTreeSet<usize> = BTreeSet::new();
		let mut history_counts: Vec<(usize, u64)> = Vec::new();
		for item in history {
			match self.tag_space.index_of(&item.tag) {
				Some(idx) => {
					visited.insert(idx);
					history_counts.push((idx, item.count));
				}
				None => {
					tracing::warn!(tag = %item.tag, "History tag not in vocabulary, ignoring");
				}
			}
		}

		if visited.is_empty() {
			return self.popular_tags(top_n);
		}

		// Weight vector over the vocabulary, normalized to sum 1.
		// A zero total leaves the vector all-zero.
		let mut weights = vec![0.0f64; n];
		for &(idx, count) in &history_counts {
			weights[idx] += count as f64;
		}
		let total: f64 = weights.iter().sum();
		if total > 0.0 {
			for w in &mut weights {
				*w /= total;
			}
		}

		// scores = weights . matrix
		let mut scores = vec![0.0f64; n];
		for (i, &w) in weights.iter().enumerate() {
			if w == 0.0 {
				continue;
			}
			let row = &self.matrix[i * n..(i + 1) * n];
			for (score, value) in scores.iter_mut().zip(row.iter()) {
				*score += w * value;
			}
		}

		// Blend with log-popularity for every unvisited tag.
		let mut qualifying: Vec<(usize, f64)> = Vec::new();
		let mut remainder: Vec<usize> = Vec::new();
		for j in 0..n {
			if visited.contains(&j) {
				continue;
			}
			let blended = SIMILARITY_WEIGHT * scores[j]
				+ POPULARITY_WEIGHT * (self.tag_counts[j] as f64).ln_1p();
			if blended > 0.0 {
				qualifying.push((j, blended));
			} else {
				remainder.push(j);
			}
		}

		qualifying.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

		let mut result: Vec<ScoredTag> = qualifying
			.into_iter()
			.take(top_n)
			.filter_map(|(idx, score)| {
				self.tag_space.tag_at(idx).map(|tag| ScoredTag {
					tag: tag.to_string(),
					score,
				})
			})
			.collect();

		// Not enough scored candidates: backfill from the unexplored part of
		// the vocabulary in randomized order.
		if result.len() < top_n {
			remainder.shuffle(&mut rand::rng());
			for idx in remainder {
				if result.len() >= top_n {
					break;
				}
				if let Some(tag) = self.tag_space.tag_at(idx) {
					result.push(ScoredTag {
						tag: tag.to_string(),
						score: 0.0,
					});
				}
			}
		}

		result
	}

	// -- Metadata -------------------------------------------------------------

	pub fn info(&mut self) -> ModelInfo {
		let popular = self
			.popular_tags(POPULAR_TAGS_IN_INFO)
			.into_iter()
			.map(|scored| PopularTag {
				count: scored.score as u64,
				tag: scored.tag,
			})
			.collect();

		ModelInfo {
			version: self.version,
			tags_count: self.tag_space.len(),
			total_visits: self.total_visits,
			last_updated: self.last_updated,
			most_popular_tags: popular,
		}
	}

	// -- Snapshot bridge ------------------------------------------------------

	/// Serialize the full model state for persistence.
	pub fn to_snapshot(&self) -> ModelSnapshot {
		let n = self.tag_space.len();
		let raw_rows = (0..n)
			.map(|i| snapshot::encode_row(&self.raw[i * n..(i + 1) * n]))
			.collect();

		ModelSnapshot {
			schema_version: SNAPSHOT_SCHEMA_VERSION,
			tags: self.tag_space.tags().to_vec(),
			tag_counts: self.tag_counts.clone(),
			raw_rows,
			total_visits: self.total_visits,
			model_version: self.version,
			last_updated: self.last_updated,
			saved_at: current_timestamp_ms(),
		}
	}

	/// Rebuild a model from a snapshot, re-deriving the normalized matrix
	/// from the persisted raw sums. When `expected` is given, the snapshot's
	/// vocabulary must match it exactly.
	pub fn from_snapshot(
		snapshot_data: ModelSnapshot,
		expected: Option<&TagSpace>,
	) -> Result<Self, SnapshotError> {
		let tag_space = TagSpace::new(snapshot_data.tags.clone());
		if tag_space.tags() != snapshot_data.tags.as_slice() {
			return Err(SnapshotError::Corruption(
				"Vocabulary not in canonical order".into(),
			));
		}
		if let Some(expected) = expected {
			if expected.tags() != tag_space.tags() {
				return Err(SnapshotError::Incompatible(format!(
					"Vocabulary mismatch: snapshot has {} tags, expected {}",
					tag_space.len(),
					expected.len()
				)));
			}
		}

		let n = tag_space.len();
		if snapshot_data.tag_counts.len() != n {
			return Err(SnapshotError::Corruption(format!(
				"Tag count length {} does not match vocabulary size {}",
				snapshot_data.tag_counts.len(),
				n
			)));
		}
		if snapshot_data.raw_rows.len() != n {
			return Err(SnapshotError::Corruption(format!(
				"Matrix has {} rows, expected {}",
				snapshot_data.raw_rows.len(),
				n
			)));
		}

		let mut raw = Vec::with_capacity(n * n);
		for encoded in &snapshot_data.raw_rows {
			let row = snapshot::decode_row(encoded)?;
			if row.len() != n {
				return Err(SnapshotError::Corruption(format!(
					"Matrix row length {} does not match vocabulary size {}",
					row.len(),
					n
				)));
			}
			raw.extend_from_slice(&row);
		}

		let counted: u64 = snapshot_data.tag_counts.iter().sum();
		if counted != snapshot_data.total_visits {
			return Err(SnapshotError::Corruption(format!(
				"Total visits {} does not match summed tag counts {}",
				snapshot_data.total_visits, counted
			)));
		}

		let mut model = Self {
			tag_space,
			raw,
			matrix: vec![0.0; n * n],
			tag_counts: snapshot_data.tag_counts,
			total_visits: snapshot_data.total_visits,
			version: snapshot_data.model_version,
			last_updated: snapshot_data.last_updated,
			popularity: None,
		};
		for i in 0..n {
			model.normalize_row(i);
		}
		Ok(model)
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
