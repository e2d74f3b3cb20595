pub mod build;
pub mod cli;
pub mod commands;
pub mod infra;
pub mod params;
pub mod paths;
pub mod retry;
pub mod transport;
pub mod upload;
pub mod validate;

// Re-export core types for convenience
pub use params::BuildParams;
pub use transport::Transport;
