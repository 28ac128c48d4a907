pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod tagspace;
pub mod transport;
pub mod types;
