pub mod build;
pub mod infra;
pub mod preflight;
pub mod run;
pub mod test;
pub mod upload;

// Re-export command functions
pub use build::cmd_build;
pub use infra::cmd_infra;
pub use preflight::cmd_preflight;
pub use run::cmd_run;
pub use test::cmd_test;
pub use upload::cmd_upload;
