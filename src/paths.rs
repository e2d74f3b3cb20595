use directories::ProjectDirs;
use std::path::PathBuf;

/// Base directory for all nodeforge data
pub fn base_dir() -> PathBuf {
    match ProjectDirs::from("", "", "nodeforge") {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => PathBuf::from(shellexpand::tilde("~/.local/share/nodeforge").as_ref()),
    }
}

/// Directory for per-run build and test logs
pub fn logs_dir() -> PathBuf {
    base_dir().join("logs")
}

/// Path to the build log for a given run timestamp
pub fn build_log(timestamp: &str) -> PathBuf {
    logs_dir().join(format!("build-{}.log", timestamp))
}

/// Path to the test log for a given run timestamp
pub fn test_log(timestamp: &str) -> PathBuf {
    logs_dir().join(format!("test-{}.log", timestamp))
}

/// SSH private key written after provisioning (owner-only permissions)
pub fn key_file() -> PathBuf {
    base_dir().join("ssh-key.pem")
}

/// Staging directory for images fetched for validation
pub fn staging_dir() -> PathBuf {
    base_dir().join("staging")
}
