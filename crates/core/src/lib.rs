//! Core orchestration logic for dispatching work across remote endpoints.
//!
//! Everything here is transport-agnostic: round-robin endpoint selection,
//! retry with backoff, the bounded scheduler, outcome aggregation, duel
//! scoring, and the filesystem helpers the pipelines share. HTTP lives in
//! `meshgen-remote`; the pipelines themselves in `meshgen-pipeline`.

pub mod audit;
pub mod duel;
pub mod endpoint_pool;
pub mod error;
pub mod hashing;
pub mod observer;
pub mod outcome;
pub mod prompts;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod types;
