pub mod collaborators;
pub mod connectors;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod schedule;
pub mod store;
pub mod webhooks;
pub mod worker;

pub use error::{Result, SyncError};
