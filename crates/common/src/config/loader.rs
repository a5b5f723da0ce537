use crate::config::components::global::MigratorConfig;
use crate::config::error::ConfigError;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "migrator.yml";

/// Reads `migrator.yml` from `config_path` (a directory or the file itself),
/// or from the working directory when no path is given. Relative paths in
/// the file are resolved against the directory holding it.
pub fn read_config(config_path: Option<PathBuf>) -> Result<MigratorConfig, ConfigError> {
    let config_file = match config_path {
        Some(path) if path.is_dir() => path.join(CONFIG_FILE_NAME),
        Some(path) => path,
        None => PathBuf::from(CONFIG_FILE_NAME),
    };
    if !config_file.exists() {
        return Err(ConfigError::path_error(&config_file));
    }

    info!("loading config from {}", config_file.display());
    let file = fs::File::open(&config_file)?;
    let mut config: MigratorConfig = serde_yaml::from_reader(file)?;

    let config_root = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    config.credentials_dir = resolve_path(&config_root, &config.credentials_dir);
    config.templates_dir = config
        .templates_dir
        .as_ref()
        .map(|dir| resolve_path(&config_root, dir));

    if let Some(dir) = &config.templates_dir {
        if !dir.exists() {
            return Err(ConfigError::path_error(dir));
        }
    }

    config.validate()?;
    Ok(config)
}

fn resolve_path(root: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}
