//! Thin HTTP adapter over the orchestration core.
//!
//! Routes map 1:1 onto the core contract (`submit`/`status`/`cancel`/
//! `health`); no request shaping beyond serde, no user-facing text beyond
//! the job error detail the core recorded.

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;

pub use server::{router, run};
