use std::sync::Arc;

use clap::Parser;

use tagrec_engine::config::{self, CliArgs, ServiceConfig};
use tagrec_engine::server::RecommenderServer;
use tagrec_engine::service::RecommenderService;
use tagrec_engine::transport::NdjsonTransport;

fn main() {
	let args = CliArgs::parse();

	// Logging to stderr (stdout carries JSON-RPC traffic exclusively)
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			tracing::error!("Failed to start runtime: {}", e);
			std::process::exit(1);
		}
	};

	let service_config = ServiceConfig::from_args(&args);
	let service = Arc::new(RecommenderService::new(service_config));

	// Eager initialization when a vocabulary file or an existing snapshot
	// gives us something to build from; otherwise the client initializes
	// over the wire.
	let startup_tags = match &args.tags_file {
		Some(path) => match config::load_tags_file(path) {
			Ok(tags) => Some(tags),
			Err(e) => {
				tracing::error!(path = %path.display(), "Failed to read vocabulary file: {}", e);
				std::process::exit(1);
			}
		},
		None => args
			.snapshot_path
			.as_deref()
			.filter(|path| path.exists())
			.map(|_| Vec::new()),
	};
	if let Some(tags) = startup_tags {
		if let Err(e) = runtime.block_on(service.initialize(tags)) {
			tracing::error!("Failed to initialize recommender: {}", e);
			std::process::exit(1);
		}
	}

	runtime.block_on(service.start());

	let mut server = RecommenderServer::new(
		Arc::clone(&service),
		NdjsonTransport::new(),
		runtime.handle().clone(),
	);

	tracing::info!("tagrec-engine ready");

	let result = server.run();

	// stdin closed without a shutdown request: stop cleanly anyway.
	runtime.block_on(service.stop());

	if let Err(e) = result {
		tracing::error!("Server error: {}", e);
		std::process::exit(1);
	}
}
