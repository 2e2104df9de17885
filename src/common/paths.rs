use std::path::PathBuf;
use directories::ProjectDirs;

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/rollcall")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/rollcall/rollcall.toml")
}

/// Per-user data directory, falling back to the system location when the
/// platform reports no home directory.
pub fn user_data_dir() -> PathBuf {
    ProjectDirs::from("com", "rollcall", "Rollcall")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(system_data_dir)
}

pub fn training_dir(base: &std::path::Path) -> PathBuf {
    base.join("training")
}

pub fn model_dir(base: &std::path::Path) -> PathBuf {
    base.join("model")
}
