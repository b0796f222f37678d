//! Datasource sync orchestration: staging, connection testing, stream
//! selection, scheduling and webhook-driven completion of connector syncs.

pub mod api;
pub mod core;
pub mod models;
pub mod utils;

pub use crate::core::{Result, SyncError};
pub use utils::{AppError, AppState, Config};
