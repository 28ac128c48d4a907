use serde::{Deserialize, Serialize};

use crate::types::{TagHistoryItem, VisitEvent};

// JSON-RPC 2.0 error codes
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const RECOMMEND_ERROR: i32 = -32000;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 framing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: &'static str,
	pub id: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
	pub code: i32,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Method params (camelCase on the wire)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct InitializeParams {
	#[serde(default)]
	pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendParams {
	#[serde(default)]
	pub history: Vec<TagHistoryItem>,
	#[serde(rename = "topN", default = "default_top_n")]
	pub top_n: usize,
}

fn default_top_n() -> usize {
	5
}

#[derive(Debug, Deserialize)]
pub struct RecordVisitParams {
	pub user: String,
	pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFromHistoryParams {
	pub user: String,
	#[serde(default)]
	pub history: Vec<TagHistoryItem>,
}

#[derive(Debug, Deserialize)]
pub struct TrainParams {
	pub visits: Vec<VisitEvent>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn recommend_params_default_top_n() {
		let params: RecommendParams =
			serde_json::from_value(json!({"history": [{"tag": "beach"}]})).unwrap();
		assert_eq!(params.top_n, 5);
		assert_eq!(params.history.len(), 1);
		assert_eq!(params.history[0].count, 1);
	}

	#[test]
	fn recommend_params_accept_explicit_top_n() {
		let params: RecommendParams =
			serde_json::from_value(json!({"topN": 10})).unwrap();
		assert_eq!(params.top_n, 10);
		assert!(params.history.is_empty());
	}

	#[test]
	fn request_params_default_to_null() {
		let request: JsonRpcRequest =
			serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"recommender/info"}"#)
				.unwrap();
		assert_eq!(request.id, 1);
		assert!(request.params.is_null());
	}

	#[test]
	fn error_response_omits_empty_fields() {
		let response = JsonRpcResponse {
			jsonrpc: "2.0",
			id: 7,
			result: None,
			error: Some(JsonRpcError {
				code: RECOMMEND_ERROR,
				message: "boom".to_string(),
				data: None,
			}),
		};
		let text = serde_json::to_string(&response).unwrap();
		assert!(!text.contains("result"));
		assert!(!text.contains("data"));
	}
}
