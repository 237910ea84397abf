//! Resolve the client configuration from file and flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rws_client_core::{ClientConfig, ReconnectConfig, SignalingUrlBuilder};
use tracing::debug;

use crate::GlobalArgs;

/// `$XDG_CONFIG_HOME/rws/config.toml` or the platform equivalent
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rws").join("config.toml"))
}

/// File first, then command-line overrides
pub fn resolve(args: &GlobalArgs) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => load(path)?,
        None => match default_config_path().filter(|path| path.exists()) {
            Some(path) => load(&path)?,
            None => ClientConfig::default(),
        },
    };

    if let Some(host) = &args.host {
        config.signaling_url = SignalingUrlBuilder::new(host).secure(args.secure).build();
    }
    if let Some(url) = &args.url {
        config.signaling_url = url.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(timeout_ms));
    }
    if args.dump_traffic {
        config.dump_traffic = true;
    }
    // one-shot commands never wait for a reconnect
    config.reconnect = ReconnectConfig::disabled();

    config.validate().context("invalid client configuration")?;
    debug!(url = %config.signaling_url, "Configuration resolved");
    Ok(config)
}

fn load(path: &Path) -> Result<ClientConfig> {
    ClientConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}
