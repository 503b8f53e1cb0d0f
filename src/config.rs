//! Runtime configuration, read from the environment (and `.env`)

use crate::backoff::Backoff;
use crate::types::ChannelName;
use crate::upstream::UpstreamConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// None when the upstream client is disabled
    pub upstream: Option<UpstreamConfig>,
    pub initial_channel: Option<ChannelName>,
    pub simulation_enabled: bool,
    pub subscriber_buffer: usize,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env_string("RELAY_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "RELAY_BIND_ADDR",
                reason: e.to_string(),
            })?;

        let initial_channel = match env_string("INITIAL_CHANNEL") {
            Some(raw) => Some(ChannelName::parse(&raw).ok_or(ConfigError::Invalid {
                name: "INITIAL_CHANNEL",
                reason: format!("{:?} is not a channel name", raw),
            })?),
            None => None,
        };

        let upstream = if env_flag("UPSTREAM_ENABLED", true) {
            let url = env_string("UPSTREAM_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
            if !(url.starts_with("wss://") || url.starts_with("ws://")) {
                return Err(ConfigError::Invalid {
                    name: "UPSTREAM_URL",
                    reason: format!("{} is not a websocket URL", url),
                });
            }

            let backoff = Backoff::new(
                Duration::from_millis(env_number("RECONNECT_BASE_MS", 1000)),
                Duration::from_millis(env_number("RECONNECT_MAX_DELAY_MS", 30_000)),
                Duration::from_millis(env_number("RECONNECT_JITTER_MS", 250)),
            );

            Some(UpstreamConfig {
                url,
                max_reconnect_attempts: env_number("RECONNECT_MAX_ATTEMPTS", 5),
                backoff,
                initial_channel: initial_channel.clone(),
            })
        } else {
            tracing::info!("Upstream chat disabled, serving simulated chat only");
            None
        };

        Ok(Self {
            bind_addr,
            upstream,
            initial_channel,
            simulation_enabled: env_flag("SIMULATION_ENABLED", true),
            subscriber_buffer: env_number("SUBSCRIBER_BUFFER", 64),
        })
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `0` or `false` disable, anything else enables
fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(default)
}

fn env_number<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("{}={:?} is not a valid number, using {}", name, raw, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "RELAY_BIND_ADDR",
        "UPSTREAM_ENABLED",
        "UPSTREAM_URL",
        "INITIAL_CHANNEL",
        "RECONNECT_MAX_ATTEMPTS",
        "RECONNECT_BASE_MS",
        "RECONNECT_MAX_DELAY_MS",
        "RECONNECT_JITTER_MS",
        "SIMULATION_ENABLED",
        "SUBSCRIBER_BUFFER",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = RelayConfig::from_env().unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000".parse().unwrap());
        assert!(config.simulation_enabled);
        assert_eq!(config.subscriber_buffer, 64);
        assert!(config.initial_channel.is_none());

        let upstream = config.upstream.unwrap();
        assert_eq!(upstream.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(upstream.max_reconnect_attempts, 5);
        assert_eq!(upstream.backoff.base, Duration::from_secs(1));
        assert_eq!(upstream.backoff.max, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("RELAY_BIND_ADDR", "127.0.0.1:8080");
        std::env::set_var("INITIAL_CHANNEL", "#SomeStreamer");
        std::env::set_var("RECONNECT_MAX_ATTEMPTS", "9");
        std::env::set_var("SIMULATION_ENABLED", "false");
        std::env::set_var("SUBSCRIBER_BUFFER", "not-a-number");

        let config = RelayConfig::from_env().unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.initial_channel.unwrap().as_str(), "somestreamer");
        assert!(!config.simulation_enabled);
        assert_eq!(config.subscriber_buffer, 64);

        let upstream = config.upstream.unwrap();
        assert_eq!(upstream.max_reconnect_attempts, 9);
        assert_eq!(upstream.initial_channel.unwrap().as_str(), "somestreamer");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_upstream_can_be_disabled() {
        clear_env();
        std::env::set_var("UPSTREAM_ENABLED", "0");
        let config = RelayConfig::from_env().unwrap();
        assert!(config.upstream.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_errors() {
        clear_env();
        std::env::set_var("RELAY_BIND_ADDR", "nowhere");
        assert!(matches!(
            RelayConfig::from_env(),
            Err(ConfigError::Invalid {
                name: "RELAY_BIND_ADDR",
                ..
            })
        ));

        clear_env();
        std::env::set_var("UPSTREAM_URL", "http://example.com");
        assert!(matches!(
            RelayConfig::from_env(),
            Err(ConfigError::Invalid {
                name: "UPSTREAM_URL",
                ..
            })
        ));
        clear_env();
    }
}
