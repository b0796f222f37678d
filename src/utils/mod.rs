pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod shutdown;
pub mod state;

pub use config::*;
pub use error::*;
pub use shutdown::shutdown_signal;
pub use state::*;
