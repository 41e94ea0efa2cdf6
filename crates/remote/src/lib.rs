//! HTTP adapters for the remote services a meshgen run talks to:
//! prompt image hosts, generation, render and judge endpoints.
//!
//! Every client maps failures onto [`error::RemoteError`], which knows
//! whether a failure is worth retrying.

pub mod download;
pub mod error;
pub mod generate;
pub mod health;
mod http;
pub mod judge;
pub mod render;
pub mod services;

pub use error::RemoteError;
pub use http::{build_client, CONNECT_TIMEOUT};
