use super::config::CustodiaConfig;
use std::path::{Path, PathBuf};

/// Write a commented default configuration file
///
/// The data directory defaults to the directory holding the config file.
/// An existing file is only replaced with `--force`.
pub fn execute(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    let data_dir = data_dir.unwrap_or_else(|| {
        config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(super::config::default_data_dir)
    });

    CustodiaConfig::create_default(config_path, &data_dir)?;
    println!("Created: {}", config_path.display());
    println!("Data directory: {}", data_dir.display());
    Ok(())
}
