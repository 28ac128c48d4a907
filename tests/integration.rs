// ---------------------------------------------------------------------------
// Integration tests for the tagrec-engine JSON-RPC 2.0 / NDJSON protocol
// ---------------------------------------------------------------------------
//
// Each test spawns a fresh tagrec-engine binary and communicates via
// stdin/stdout using newline-delimited JSON-RPC 2.0 messages.
// ---------------------------------------------------------------------------

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

struct EngineProcess {
	child: Child,
	reader: BufReader<std::process::ChildStdout>,
	next_id: AtomicU64,
}

impl EngineProcess {
	fn spawn() -> Self {
		Self::spawn_with_args(&[])
	}

	fn spawn_with_args(args: &[&str]) -> Self {
		let bin = env!("CARGO_BIN_EXE_tagrec-engine");
		let mut child = Command::new(bin)
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()
			.expect("failed to spawn tagrec-engine");

		let stdout = child.stdout.take().expect("no stdout");
		let reader = BufReader::new(stdout);

		Self {
			child,
			reader,
			next_id: AtomicU64::new(1),
		}
	}

	fn send(&mut self, method: &str, params: Value) -> RpcResponse {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let request = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let stdin = self.child.stdin.as_mut().expect("no stdin");
		let mut line = serde_json::to_string(&request).unwrap();
		line.push('\n');
		stdin.write_all(line.as_bytes()).unwrap();
		stdin.flush().unwrap();

		loop {
			let mut buf = String::new();
			let bytes_read = self
				.reader
				.read_line(&mut buf)
				.expect("failed to read from stdout");
			if bytes_read == 0 {
				panic!("unexpected EOF while waiting for response to id={}", id);
			}
			let buf = buf.trim();
			if buf.is_empty() {
				continue;
			}
			let parsed: Value = serde_json::from_str(buf)
				.unwrap_or_else(|e| panic!("invalid JSON from engine: {e}\nline: {buf}"));
			if parsed.get("id").is_none() {
				continue;
			}
			let resp_id = parsed["id"].as_u64().expect("response id is not u64");
			assert_eq!(resp_id, id, "response id mismatch");
			if let Some(error) = parsed.get("error") {
				return RpcResponse::Error(error.clone());
			}
			return RpcResponse::Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
		}
	}

	fn call(&mut self, method: &str, params: Value) -> Value {
		match self.send(method, params) {
			RpcResponse::Ok(v) => v,
			RpcResponse::Error(e) => panic!("expected success, got error: {e}"),
		}
	}

	fn call_err(&mut self, method: &str, params: Value) -> Value {
		match self.send(method, params) {
			RpcResponse::Error(e) => e,
			RpcResponse::Ok(v) => panic!("expected error, got success: {v}"),
		}
	}

	/// Initialize with the shared four-place vocabulary.
	fn initialize(&mut self) -> Value {
		self.call(
			"recommender/initialize",
			json!({ "tags": ["beach", "mountain", "desert", "forest"] }),
		)
	}
}

impl Drop for EngineProcess {
	fn drop(&mut self) {
		drop(self.child.stdin.take());
		let _ = self.child.wait();
	}
}

#[derive(Debug)]
enum RpcResponse {
	Ok(Value),
	Error(Value),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn initialize_and_info() {
	let mut proc = EngineProcess::spawn();
	let result = proc.initialize();

	assert_eq!(result["tagsCount"].as_u64().unwrap(), 4);
	assert_eq!(result["totalVisits"].as_u64().unwrap(), 0);
	assert_eq!(result["pendingUpdates"].as_u64().unwrap(), 0);

	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["tagsCount"].as_u64().unwrap(), 4);
	assert_eq!(info["version"].as_u64().unwrap(), 1);
}

#[test]
fn operations_error_before_initialize() {
	let mut proc = EngineProcess::spawn();

	let error = proc.call_err("recommender/recommend", json!({ "history": [] }));
	assert_eq!(error["code"].as_i64().unwrap(), -32000);
	assert_eq!(
		error["data"]["tagrecCode"].as_str().unwrap(),
		"TAGREC_NOT_INITIALIZED"
	);

	let error = proc.call_err(
		"recommender/recordVisit",
		json!({ "user": "A", "tag": "beach" }),
	);
	assert_eq!(
		error["data"]["tagrecCode"].as_str().unwrap(),
		"TAGREC_NOT_INITIALIZED"
	);
}

#[test]
fn train_and_recommend_end_to_end() {
	let mut proc = EngineProcess::spawn();
	proc.initialize();

	let result = proc.call(
		"recommender/train",
		json!({ "visits": [
			{ "user": "A", "tag": "beach" },
			{ "user": "A", "tag": "mountain" },
			{ "user": "B", "tag": "desert" },
			{ "user": "C", "tag": "forest" }
		] }),
	);
	assert_eq!(result["skipped"].as_u64().unwrap(), 0);

	let result = proc.call(
		"recommender/recommend",
		json!({
			"history": [
				{ "tag": "beach", "count": 2 },
				{ "tag": "mountain", "count": 1 }
			],
			"topN": 2
		}),
	);
	let recs = result["recommendations"].as_array().unwrap();
	assert_eq!(recs.len(), 2);
	assert_eq!(recs[0]["tag"].as_str().unwrap(), "desert");
	assert_eq!(recs[1]["tag"].as_str().unwrap(), "forest");
	assert!(recs[0]["score"].as_f64().unwrap() > 0.0);
}

#[test]
fn train_reports_skipped_events() {
	let mut proc = EngineProcess::spawn();
	proc.initialize();

	let result = proc.call(
		"recommender/train",
		json!({ "visits": [
			{ "user": "A", "tag": "beach" },
			{ "user": "A", "tag": "volcano" }
		] }),
	);
	assert_eq!(result["skipped"].as_u64().unwrap(), 1);

	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 1);
}

#[test]
fn record_visit_queues_until_force_update() {
	let mut proc = EngineProcess::spawn_with_args(&["--poll-interval-ms", "3600000"]);
	proc.initialize();

	proc.call(
		"recommender/recordVisit",
		json!({ "user": "A", "tag": "beach" }),
	);
	let result = proc.call(
		"recommender/recordVisit",
		json!({ "user": "A", "tag": "mountain" }),
	);
	assert_eq!(result["pendingUpdates"].as_u64().unwrap(), 2);

	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["pendingUpdates"].as_u64().unwrap(), 2);
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 0);

	let result = proc.call("recommender/forceUpdate", json!({}));
	assert_eq!(result["merged"].as_u64().unwrap(), 2);

	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["pendingUpdates"].as_u64().unwrap(), 0);
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 2);
}

#[test]
fn update_from_history_expands_counts() {
	let mut proc = EngineProcess::spawn_with_args(&["--poll-interval-ms", "3600000"]);
	proc.initialize();

	let result = proc.call(
		"recommender/updateFromHistory",
		json!({
			"user": "A",
			"history": [
				{ "tag": "beach", "count": 3 },
				{ "tag": "desert" }
			]
		}),
	);
	assert_eq!(result["pendingUpdates"].as_u64().unwrap(), 4);

	proc.call("recommender/forceUpdate", json!({}));
	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 4);
}

#[test]
fn queue_pressure_flushes_inline() {
	let mut proc = EngineProcess::spawn_with_args(&[
		"--batch-size",
		"1",
		"--poll-interval-ms",
		"3600000",
	]);
	proc.initialize();

	// batch size 1: the second pending visit trips the 2x valve.
	proc.call(
		"recommender/recordVisit",
		json!({ "user": "A", "tag": "beach" }),
	);
	proc.call(
		"recommender/recordVisit",
		json!({ "user": "A", "tag": "desert" }),
	);

	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["pendingUpdates"].as_u64().unwrap(), 0);
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 2);
}

#[test]
fn recommend_excludes_history_and_caps_results() {
	let mut proc = EngineProcess::spawn();
	proc.initialize();
	proc.call(
		"recommender/train",
		json!({ "visits": [
			{ "user": "A", "tag": "beach" },
			{ "user": "B", "tag": "desert" }
		] }),
	);

	let result = proc.call(
		"recommender/recommend",
		json!({ "history": [{ "tag": "beach", "count": 1 }], "topN": 100 }),
	);
	let recs = result["recommendations"].as_array().unwrap();
	assert_eq!(recs.len(), 3);
	for rec in recs {
		assert_ne!(rec["tag"].as_str().unwrap(), "beach");
	}
}

#[test]
fn cold_start_recommends_popular_tags() {
	let mut proc = EngineProcess::spawn();
	proc.initialize();
	proc.call(
		"recommender/train",
		json!({ "visits": [
			{ "user": "A", "tag": "forest" },
			{ "user": "B", "tag": "forest" },
			{ "user": "C", "tag": "desert" }
		] }),
	);

	let result = proc.call("recommender/recommend", json!({ "history": [] }));
	let recs = result["recommendations"].as_array().unwrap();
	assert_eq!(recs[0]["tag"].as_str().unwrap(), "forest");
	assert_eq!(recs[1]["tag"].as_str().unwrap(), "desert");
}

#[test]
fn unknown_method_and_invalid_params() {
	let mut proc = EngineProcess::spawn();

	let error = proc.call_err("recommender/unknown", json!({}));
	assert_eq!(error["code"].as_i64().unwrap(), -32601);

	let error = proc.call_err("recommender/recordVisit", json!({ "tag": "beach" }));
	assert_eq!(error["code"].as_i64().unwrap(), -32602);
}

#[test]
fn shutdown_stops_the_process() {
	let mut proc = EngineProcess::spawn();
	proc.initialize();

	let result = proc.call("recommender/shutdown", json!({}));
	assert!(result["stopped"].as_bool().unwrap());

	let status = proc.child.wait().expect("wait failed");
	assert!(status.success());
}

#[test]
fn snapshot_survives_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("model.json.gz");
	let path_arg = path.to_str().unwrap().to_string();

	{
		let mut proc = EngineProcess::spawn_with_args(&["--snapshot-path", &path_arg]);
		proc.initialize();
		proc.call(
			"recommender/train",
			json!({ "visits": [
				{ "user": "A", "tag": "beach" },
				{ "user": "A", "tag": "mountain" }
			] }),
		);
		proc.call("recommender/shutdown", json!({}));
	}
	assert!(path.exists());

	// The snapshot alone initializes the restarted engine.
	let mut proc = EngineProcess::spawn_with_args(&["--snapshot-path", &path_arg]);
	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["tagsCount"].as_u64().unwrap(), 4);
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 2);
}

#[test]
fn shutdown_drains_pending_visits_to_the_snapshot() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("model.json.gz");
	let path_arg = path.to_str().unwrap().to_string();

	{
		let mut proc = EngineProcess::spawn_with_args(&[
			"--snapshot-path",
			&path_arg,
			"--poll-interval-ms",
			"3600000",
		]);
		proc.initialize();
		proc.call(
			"recommender/recordVisit",
			json!({ "user": "A", "tag": "beach" }),
		);
		proc.call("recommender/shutdown", json!({}));
	}

	let mut proc = EngineProcess::spawn_with_args(&["--snapshot-path", &path_arg]);
	let info = proc.call("recommender/info", json!({}));
	assert_eq!(info["totalVisits"].as_u64().unwrap(), 1);
}
