pub mod paths;
pub mod settings;

pub use paths::PathManager;
pub use settings::{Settings, StorageSettings};

/// Load `FLOWSTORE_*` and other variables from `./.env`, then `~/.env`.
/// Variables already set are never overwritten, so the process environment
/// wins over the project file, which wins over the home file.
pub fn load_env_file() {
    dotenv::dotenv().ok();
    if let Some(home) = dirs::home_dir() {
        dotenv::from_path(home.join(".env")).ok();
    }
}
