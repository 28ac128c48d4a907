use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::error::RecommendError;

#[derive(Parser, Debug)]
#[command(name = "tagrec-engine", about = "Co-occurrence tag recommendation engine over JSON-RPC 2.0 / NDJSON stdio")]
pub struct CliArgs {
	/// Vocabulary file: JSON array of tags, or one tag per line
	#[arg(long, env = "TAGREC_TAGS_FILE")]
	pub tags_file: Option<PathBuf>,

	/// Snapshot file for durable model state (gzipped JSON)
	#[arg(long, env = "TAGREC_SNAPSHOT_PATH")]
	pub snapshot_path: Option<PathBuf>,

	/// Queued visits merged per background flush
	#[arg(long, default_value = "50", env = "TAGREC_BATCH_SIZE")]
	pub batch_size: usize,

	/// Background flush poll interval in milliseconds
	#[arg(long, default_value = "1000", env = "TAGREC_POLL_INTERVAL_MS")]
	pub poll_interval_ms: u64,

	/// Maximum wait for the background task on shutdown, in milliseconds
	#[arg(long, default_value = "5000", env = "TAGREC_STOP_TIMEOUT_MS")]
	pub stop_timeout_ms: u64,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "TAGREC_LOG_LEVEL")]
	pub log_level: String,
}

/// Runtime knobs for the recommender service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
	pub batch_size: usize,
	pub poll_interval: Duration,
	pub stop_timeout: Duration,
	pub snapshot_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			batch_size: 50,
			poll_interval: Duration::from_millis(1000),
			stop_timeout: Duration::from_millis(5000),
			snapshot_path: None,
		}
	}
}

impl ServiceConfig {
	pub fn from_args(args: &CliArgs) -> Self {
		Self {
			// A zero batch size would make every flush a no-op.
			batch_size: args.batch_size.max(1),
			poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
			stop_timeout: Duration::from_millis(args.stop_timeout_ms),
			snapshot_path: args.snapshot_path.clone(),
		}
	}
}

/// Read a vocabulary file: a JSON array of strings, or plain text with one
/// tag per line. Blank lines and surrounding whitespace are ignored.
pub fn load_tags_file(path: &Path) -> Result<Vec<String>, RecommendError> {
	let content = std::fs::read_to_string(path)?;
	if let Ok(tags) = serde_json::from_str::<Vec<String>>(&content) {
		return Ok(tags);
	}
	Ok(content
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_string)
		.collect())
}
