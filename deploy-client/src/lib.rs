//! Deploy Client Library
//!
//! Uploads web application archives to a hosting service, replacing the
//! archive with a delta of what the service does not already hold whenever
//! it can.

pub mod api;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod delta;
pub mod deploy;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::DeployError;
pub type Result<T> = std::result::Result<T, DeployError>;
