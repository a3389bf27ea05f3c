//! Client configuration loading.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use parcel_core::config::ClientConfig;
use std::path::Path;

/// Command-line overrides applied on top of file and environment settings.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub chunk_size: Option<u64>,
    pub max_parallel: Option<usize>,
}

/// Load client configuration: optional TOML file, then `PARCEL_*` env vars,
/// then command-line overrides.
pub fn load_client_config(path: Option<&Path>, overrides: &Overrides) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("client config not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("PARCEL_").split("__"));

    let mut config: ClientConfig = figment
        .extract()
        .context("failed to load client configuration")?;

    if let Some(server_url) = &overrides.server_url {
        config.server_url = server_url.clone();
    }
    if let Some(chunk_size) = overrides.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(max_parallel) = overrides.max_parallel {
        config.max_parallel = max_parallel;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}
