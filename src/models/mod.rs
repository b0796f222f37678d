pub mod datasource;
pub mod job;
pub mod webhook;

pub use datasource::*;
pub use job::*;
pub use webhook::*;
