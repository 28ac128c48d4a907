use thiserror::Error;

use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum RecommendError {
	#[error("Service not initialized: call recommender/initialize first")]
	NotInitialized,
	#[error("Empty vocabulary: cannot build a model without tags")]
	EmptyVocabulary,
	#[error("Snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Invalid params: {0}")]
	InvalidParams(String),
}

impl RecommendError {
	pub fn code(&self) -> &str {
		match self {
			Self::NotInitialized => "TAGREC_NOT_INITIALIZED",
			Self::EmptyVocabulary => "TAGREC_EMPTY_VOCABULARY",
			Self::Snapshot(e) => e.code(),
			Self::Io(_) => "TAGREC_IO",
			Self::InvalidParams(_) => "TAGREC_INVALID_PARAMS",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"tagrecCode": self.code(),
			"message": self.to_string(),
		})
	}
}
