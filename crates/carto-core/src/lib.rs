// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use serde::de::DeserializeOwned;
use std::{fs, io, path::Path};
use thiserror::Error;
use tracing::{info, warn};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Parse a TOML config file. A missing file is not an error: the caller gets `T::default()`.
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Like [`load_config`] but a broken file only costs a warning.
pub fn load_config_or_default<T>(path: impl AsRef<Path>) -> T
where
    T: DeserializeOwned + Default,
{
    match load_config(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("config: {e}; falling back to defaults");
            T::default()
        }
    }
}
