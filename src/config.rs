//! Bot configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! network = "irc.libera.chat"
//! port = 6667
//! nick = "PiBot"
//! channel = "#pibot"
//!
//! [auth]
//! method = "sasl"
//! password = "hunter2"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// How the bot logs in to network services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    None,
    NickServ,
    Sasl,
}

/// Services authentication settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// Account name; the nick is used when unset.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: String,
    /// Name of the NickServ service to send IDENTIFY to.
    #[serde(default = "default_nickserv")]
    pub nickserv: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::None,
            username: None,
            password: String::new(),
            nickserv: default_nickserv(),
        }
    }
}

/// Everything needed to run one bot on one network and one channel.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BotConfig {
    /// Server host name.
    pub network: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nick")]
    pub nick: String,
    /// The watched channel.
    pub channel: String,
    #[serde(default)]
    pub channel_password: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Seconds without a successful read before the connection is
    /// considered dead.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    /// Fixed delay between teardown and reconnect after a ping timeout.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default)]
    pub debug: bool,
}

impl BotConfig {
    /// Configuration with defaults for everything but the server and channel.
    pub fn new(network: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            port: default_port(),
            nick: default_nick(),
            channel: channel.into(),
            channel_password: String::new(),
            realname: default_realname(),
            auth: AuthConfig::default(),
            ping_timeout_secs: default_ping_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            debug: false,
        }
    }

    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("network", &self.network),
            ("nick", &self.nick),
            ("channel", &self.channel),
        ];
        for (field, value) in non_empty {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
            if value.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not contain whitespace".to_string(),
                });
            }
        }

        if self.ping_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "ping_timeout_secs",
                reason: "must be at least one second".to_string(),
            });
        }

        if self.auth.method != AuthMethod::None && self.auth.password.is_empty() {
            return Err(ConfigError::Invalid {
                field: "auth.password",
                reason: "required when an auth method is set".to_string(),
            });
        }

        Ok(())
    }

    /// Account name for services, falling back to the configured nick.
    pub fn auth_username(&self) -> &str {
        self.auth.username.as_deref().unwrap_or(&self.nick)
    }

    /// `host:port` to dial.
    pub fn address(&self) -> String {
        format!("{}:{}", self.network, self.port)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

fn default_port() -> u16 {
    6667
}

fn default_nick() -> String {
    "PiBot".to_string()
}

fn default_realname() -> String {
    "A Pi-powered IRC bot".to_string()
}

fn default_nickserv() -> String {
    "NickServ".to_string()
}

fn default_ping_timeout() -> u64 {
    240
}

fn default_reconnect_delay() -> u64 {
    10
}
