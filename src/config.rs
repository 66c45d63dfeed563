//! Environment configuration for the HTTP binary.

use std::path::PathBuf;

use crate::salt::SALT_ENV;

/// Process configuration read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Salt override. `None` means "derive one at startup".
    pub salt: Option<String>,
    pub widgets_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub resource_scheme: String,
    pub server_name: String,
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            salt: None,
            widgets_dir: PathBuf::from("widgets"),
            assets_dir: PathBuf::from("assets"),
            resource_scheme: "ui".into(),
            server_name: "apphost".into(),
            server_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Empty values count
    /// as unset; an unparseable `PORT` falls back to the default with a
    /// warning.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = ServerConfig::default();

        let port = match get("PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(port = %raw, error = %e, "invalid PORT, using default");
                defaults.port
            }),
            None => defaults.port,
        };

        ServerConfig {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port,
            salt: get(SALT_ENV),
            widgets_dir: get("WIDGETS_DIR").map(PathBuf::from).unwrap_or(defaults.widgets_dir),
            assets_dir: get("ASSETS_DIR").map(PathBuf::from).unwrap_or(defaults.assets_dir),
            resource_scheme: get("RESOURCE_SCHEME").unwrap_or(defaults.resource_scheme),
            server_name: get("SERVER_NAME").unwrap_or(defaults.server_name),
            server_version: get("SERVER_VERSION").unwrap_or(defaults.server_version),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
