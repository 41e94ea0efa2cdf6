//! The three meshgen pipelines: generate, render and judge.
//!
//! Each pipeline is a thin driver over [`meshgen_core::scheduler::Scheduler`]
//! and [`meshgen_core::retry::RetryExecutor`], generic over the remote
//! service traits from [`meshgen_remote::services`].

pub mod error;
pub mod generate;
pub mod judge;
pub mod render;
pub mod report;
pub mod runner;

pub use error::PipelineError;
pub use runner::RunOptions;
