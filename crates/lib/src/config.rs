//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.flightdeck/config.json`) and environment.
//! The backend address is resolved once at startup and never changes afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Inbound HTTP + WebSocket server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Outbound backend connection settings.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Undelivered reply elements buffered per request before the handler waits.
    #[serde(default = "default_buffer_size")]
    pub reply_buffer: usize,
}

/// Where the backend lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Backend host. Overridden by FLIGHTDECK_BACKEND_HOST.
    #[serde(default = "default_backend_host")]
    pub host: String,

    /// Backend port. Overridden by FLIGHTDECK_BACKEND_PORT.
    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// WebSocket path on the backend (default "/ws").
    #[serde(default = "default_backend_path")]
    pub path: String,

    /// Backend route producing the aircraft stream (default "acstream").
    #[serde(default = "default_backend_route")]
    pub route: String,

    /// Give up connecting after this many milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Undelivered backend elements buffered per subscription.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Elements queued behind a full subscription buffer before that subscription is failed.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_buffer_size() -> usize {
    32
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    7635
}

fn default_backend_path() -> String {
    "/ws".to_string()
}

fn default_backend_route() -> String {
    crate::backend::DEFAULT_ROUTE.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_pending() -> usize {
    1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            reply_buffer: default_buffer_size(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            path: default_backend_path(),
            route: default_backend_route(),
            connect_timeout_ms: default_connect_timeout_ms(),
            buffer_size: default_buffer_size(),
            max_pending: default_max_pending(),
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the backend host: env FLIGHTDECK_BACKEND_HOST overrides config.
pub fn resolve_backend_host(config: &Config) -> String {
    env_nonempty("FLIGHTDECK_BACKEND_HOST").unwrap_or_else(|| config.backend.host.trim().to_string())
}

/// Resolve the backend port: env FLIGHTDECK_BACKEND_PORT overrides config when it parses.
pub fn resolve_backend_port(config: &Config) -> u16 {
    match env_nonempty("FLIGHTDECK_BACKEND_PORT").map(|p| p.parse::<u16>()) {
        Some(Ok(port)) => port,
        Some(Err(e)) => {
            log::warn!("ignoring FLIGHTDECK_BACKEND_PORT: {}", e);
            config.backend.port
        }
        None => config.backend.port,
    }
}

/// WebSocket URL of the backend, e.g. `ws://127.0.0.1:7635/ws`.
pub fn backend_url(host: &str, port: u16, path: &str) -> String {
    let path = path.trim();
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("ws://{}:{}{}", host, port, path)
}

/// Backend URL for this config with env overrides applied.
pub fn resolve_backend_url(config: &Config) -> String {
    backend_url(
        &resolve_backend_host(config),
        resolve_backend_port(config),
        &config.backend.path,
    )
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FLIGHTDECK_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".flightdeck").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or FLIGHTDECK_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.gateway.port, 15152);
        assert_eq!(c.gateway.bind, "127.0.0.1");
        assert_eq!(c.backend.port, 7635);
        assert_eq!(c.backend.route, "acstream");
        assert_eq!(c.backend.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: Config =
            serde_json::from_str(r#"{ "backend": { "host": "10.0.0.5", "connectTimeoutMs": 250 } }"#)
                .unwrap();
        assert_eq!(c.backend.host, "10.0.0.5");
        assert_eq!(c.backend.port, 7635);
        assert_eq!(c.backend.connect_timeout_ms, 250);
        assert_eq!(c.gateway.reply_buffer, 32);
        assert_eq!(c.backend.max_pending, 1024);
    }

    #[test]
    fn backend_url_normalises_path() {
        assert_eq!(backend_url("h", 1, "/ws"), "ws://h:1/ws");
        assert_eq!(backend_url("h", 1, "stream"), "ws://h:1/stream");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("flightdeck-missing-{}.json", uuid::Uuid::new_v4()));
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.gateway.port, 15152);
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }
}
