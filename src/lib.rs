// ===============================
// src/lib.rs
// ===============================
pub mod codec;
pub mod config;
pub mod domain;
pub mod feed;
pub mod hub;
pub mod indicators;
pub mod metrics;
pub mod mock;
pub mod pipeline;
pub mod policy;
pub mod quorum;
pub mod recorder;
pub mod scorer;
pub mod server;
pub mod state;
pub mod upstream;   // live websocket transport (authorize + connect)
