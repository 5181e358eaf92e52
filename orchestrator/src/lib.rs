//! Asynchronous projection of control-plane records onto the Kubernetes
//! substrate, plus the LocalStack lifecycle and startup recovery.
//!
//! Everything in this crate runs off the synchronous API path. Failures are
//! logged and reflected in resource state; they never surface to ECS clients.

pub mod client;
pub mod jobs;
pub mod localstack;
pub mod materializer;
pub mod recovery;

mod error;

pub use error::Error;
pub use jobs::{Job, Orchestrator};
