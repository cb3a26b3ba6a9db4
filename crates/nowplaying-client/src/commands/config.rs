//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the loaded configuration to stdout.
pub fn dump(config: &ClientConfig, path: Option<&Path>) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::config(format!("failed to serialize config: {}", e)))?;
    let path = path.map_or_else(ClientConfig::default_path, Path::to_path_buf);
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Checks required keys, then resolves every secret reference.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.validate()?;
    config.oauth.resolve_credentials()?;
    config.status.resolve_token()?;

    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: Option<&Path>) -> ClientResult<()> {
    let path = path.map_or_else(ClientConfig::default_path, Path::to_path_buf);
    println!("config: {}", path.display());
    Ok(())
}
