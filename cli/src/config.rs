use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// `WHEY_DB` points at the database file; otherwise it lives in the
    /// platform data directory.
    pub fn from_env_with<F>(mut get: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let db_override = get("WHEY_DB")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let (data_dir, db_path) = if let Some(path) = db_override {
            let db_path = PathBuf::from(path);
            let data_dir = db_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
            (data_dir, db_path)
        } else {
            let proj_dirs =
                ProjectDirs::from("", "", "whey").context("Could not determine home directory")?;
            let data_dir = proj_dirs.data_dir().to_path_buf();
            let db_path = data_dir.join("whey.db");
            (data_dir, db_path)
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config { db_path })
    }
}
