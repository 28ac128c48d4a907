use std::io::{self, BufRead};
use std::sync::Arc;

use serde_json::json;
use tokio::runtime::Handle;

use crate::error::RecommendError;
use crate::protocol::*;
use crate::service::RecommenderService;
use crate::transport::NdjsonTransport;

/// Blocking stdin loop dispatching JSON-RPC methods onto the service.
///
/// The loop itself stays synchronous; each method call blocks on the shared
/// runtime that also drives the background flush task.
pub struct RecommenderServer {
	service: Arc<RecommenderService>,
	transport: NdjsonTransport,
	runtime: Handle,
}

impl RecommenderServer {
	pub fn new(service: Arc<RecommenderService>, transport: NdjsonTransport, runtime: Handle) -> Self {
		Self {
			service,
			transport,
			runtime,
		}
	}

	pub fn run(&mut self) -> Result<(), RecommendError> {
		let stdin = io::stdin();
		let reader = stdin.lock();

		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					continue;
				}
			};

			if self.dispatch(request) {
				break;
			}
		}

		Ok(())
	}

	/// Handle one request. Returns true when the server should exit.
	fn dispatch(&self, request: JsonRpcRequest) -> bool {
		let id = request.id;
		tracing::debug!(id, method = %request.method, "Request");

		match request.method.as_str() {
			"recommender/initialize" => self.handle_initialize(id, request.params),
			"recommender/recommend" => self.handle_recommend(id, request.params),
			"recommender/recordVisit" => self.handle_record_visit(id, request.params),
			"recommender/updateFromHistory" => self.handle_update_from_history(id, request.params),
			"recommender/forceUpdate" => self.handle_force_update(id),
			"recommender/train" => self.handle_train(id, request.params),
			"recommender/info" => self.handle_info(id),
			"recommender/shutdown" => {
				self.runtime.block_on(self.service.stop());
				self.transport.write_response(id, json!({"stopped": true}));
				return true;
			}
			other => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Method not found: {}", other),
					None,
				);
			}
		}
		false
	}

	fn handle_initialize(&self, id: u64, params: serde_json::Value) {
		let Some(params) = self.parse_params::<InitializeParams>(id, params) else {
			return;
		};
		let result = self.runtime.block_on(async {
			self.service.initialize(params.tags).await?;
			self.service.info().await
		});
		match result {
			Ok(info) => match serde_json::to_value(&info) {
				Ok(value) => self.transport.write_response(id, value),
				Err(e) => self.write_internal_error(id, e),
			},
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn handle_recommend(&self, id: u64, params: serde_json::Value) {
		let Some(params) = self.parse_params::<RecommendParams>(id, params) else {
			return;
		};
		match self
			.runtime
			.block_on(self.service.recommend(&params.history, params.top_n))
		{
			Ok(recommendations) => {
				self.transport
					.write_response(id, json!({"recommendations": recommendations}));
			}
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn handle_record_visit(&self, id: u64, params: serde_json::Value) {
		let Some(params) = self.parse_params::<RecordVisitParams>(id, params) else {
			return;
		};
		let visit = crate::types::VisitEvent {
			user: params.user,
			tag: params.tag,
		};
		match self.runtime.block_on(self.service.record_visit(visit)) {
			Ok(pending) => {
				self.transport
					.write_response(id, json!({"queued": true, "pendingUpdates": pending}));
			}
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn handle_update_from_history(&self, id: u64, params: serde_json::Value) {
		let Some(params) = self.parse_params::<UpdateFromHistoryParams>(id, params) else {
			return;
		};
		match self
			.runtime
			.block_on(self.service.update_from_history(&params.user, &params.history))
		{
			Ok(pending) => {
				self.transport
					.write_response(id, json!({"queued": true, "pendingUpdates": pending}));
			}
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn handle_force_update(&self, id: u64) {
		match self.runtime.block_on(self.service.force_update()) {
			Ok(merged) => self.transport.write_response(id, json!({"merged": merged})),
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn handle_train(&self, id: u64, params: serde_json::Value) {
		let Some(params) = self.parse_params::<TrainParams>(id, params) else {
			return;
		};
		match self.runtime.block_on(self.service.train(&params.visits)) {
			Ok(skipped) => {
				self.transport
					.write_response(id, json!({"trained": true, "skipped": skipped}));
			}
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn handle_info(&self, id: u64) {
		match self.runtime.block_on(self.service.info()) {
			Ok(info) => match serde_json::to_value(&info) {
				Ok(value) => self.transport.write_response(id, value),
				Err(e) => self.write_internal_error(id, e),
			},
			Err(e) => self.write_recommend_error(id, e),
		}
	}

	fn parse_params<T: serde::de::DeserializeOwned>(
		&self,
		id: u64,
		params: serde_json::Value,
	) -> Option<T> {
		match serde_json::from_value(params) {
			Ok(parsed) => Some(parsed),
			Err(e) => {
				self.transport
					.write_error(id, INVALID_PARAMS, format!("Invalid params: {}", e), None);
				None
			}
		}
	}

	fn write_recommend_error(&self, id: u64, error: RecommendError) {
		let code = match &error {
			RecommendError::InvalidParams(_) => INVALID_PARAMS,
			RecommendError::Io(_) => INTERNAL_ERROR,
			_ => RECOMMEND_ERROR,
		};
		self.transport
			.write_error(id, code, error.to_string(), Some(error.to_json_rpc_error()));
	}

	fn write_internal_error(&self, id: u64, error: impl std::fmt::Display) {
		self.transport
			.write_error(id, INTERNAL_ERROR, error.to_string(), None);
	}
}
