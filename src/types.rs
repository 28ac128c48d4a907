use serde::{Deserialize, Serialize};

/// One recorded visit: a user touched a tag. Consumed by fit/update,
/// never retained individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitEvent {
	pub user: String,
	pub tag: String,
}

/// One aggregated history entry for a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagHistoryItem {
	pub tag: String,
	#[serde(default = "default_count")]
	pub count: u64,
}

fn default_count() -> u64 {
	1
}

/// A recommended tag with its blended score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTag {
	pub tag: String,
	pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularTag {
	pub tag: String,
	pub count: u64,
}

/// Read-only model metadata snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
	pub version: u64,
	#[serde(rename = "tagsCount")]
	pub tags_count: usize,
	#[serde(rename = "totalVisits")]
	pub total_visits: u64,
	#[serde(rename = "lastUpdated")]
	pub last_updated: u64,
	#[serde(rename = "mostPopularTags")]
	pub most_popular_tags: Vec<PopularTag>,
}

/// Model metadata plus the service-level pending queue length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
	#[serde(flatten)]
	pub model: ModelInfo,
	#[serde(rename = "pendingUpdates")]
	pub pending_updates: usize,
}
