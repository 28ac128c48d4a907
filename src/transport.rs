use std::io::{self, Write};

use crate::protocol::{JsonRpcError, JsonRpcResponse};

/// NDJSON transport over stdout for JSON-RPC 2.0 responses.
///
/// One JSON object per line; stdout carries protocol traffic exclusively,
/// logging goes to stderr.
pub struct NdjsonTransport;

impl Default for NdjsonTransport {
	fn default() -> Self {
		Self::new()
	}
}

impl NdjsonTransport {
	pub fn new() -> Self {
		Self
	}

	/// Write a successful JSON-RPC response.
	pub fn write_response(&self, id: u64, result: serde_json::Value) {
		let msg = JsonRpcResponse {
			jsonrpc: "2.0",
			id,
			result: Some(result),
			error: None,
		};
		self.write_line(&msg);
	}

	/// Write a JSON-RPC error response.
	pub fn write_error(
		&self,
		id: u64,
		code: i32,
		message: impl Into<String>,
		data: Option<serde_json::Value>,
	) {
		let msg = JsonRpcResponse {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(JsonRpcError {
				code,
				message: message.into(),
				data,
			}),
		};
		self.write_line(&msg);
	}

	fn write_line(&self, value: &impl serde::Serialize) {
		let mut stdout = io::stdout().lock();
		if let Err(e) = serde_json::to_writer(&mut stdout, value) {
			tracing::error!("Failed to serialize response: {}", e);
			return;
		}
		if let Err(e) = writeln!(stdout) {
			tracing::error!("Failed to write newline: {}", e);
		}
		if let Err(e) = stdout.flush() {
			tracing::error!("Failed to flush stdout: {}", e);
		}
	}
}
