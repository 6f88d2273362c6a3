//! Core Module - Scan Pipeline
//!
//! Orchestrator, aggregation, the local three-model engine, its heuristic
//! models and the process-level service wiring.

pub mod adapters;
pub mod aggregator;
pub mod engine;
pub mod orchestrator;
pub mod services;

pub use adapters::*;
pub use aggregator::*;
pub use engine::*;
pub use orchestrator::*;
pub use services::ScannerServices;
