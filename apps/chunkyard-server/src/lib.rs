//! Chunkyard Server Library
//!
//! Chunked file transfer over HTTP. The server binary in main.rs wires these
//! modules together; tests and benchmarks use them directly.
//!
//! # Modules
//!
//! - `transfer`: Chunking, merging, staging and publishing of uploads
//! - `storage`: Local filesystem access with retry on transient errors
//! - `progress`: Per-upload progress fan-out
//! - `routes`: HTTP and WebSocket endpoints

pub mod config;
pub mod error;
pub mod progress;
pub mod routes;
pub mod state;
pub mod storage;
pub mod transfer;
