//! Error types for the bot engine.
//!
//! Three families live here:
//! - [`BotError`]: failures surfaced to the caller of the bot handle
//!   (connecting, configuration).
//! - [`ConfigError`]: configuration loading and validation.
//! - [`SessionError`]: fatal protocol conditions reported by the server
//!   during registration, authentication or channel join. These never
//!   travel up as `Err`; the supervisor logs them and tears the connection
//!   down.

use thiserror::Error;

/// Convenience type alias for Results using [`BotError`].
pub type Result<T, E = BotError> = std::result::Result<T, E>;

/// Top-level bot errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BotError {
    /// I/O error outside of connection establishment.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The TCP connection to the server could not be opened.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// `host:port` that was dialled.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Fatal protocol conditions.
///
/// Each of these stops the bot without scheduling a reconnect: they point at
/// a configuration problem rather than a transient fault.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// 462: we sent a registration command twice.
    #[error("User already registered!")]
    AlreadyRegistered,

    /// 432: the server rejected the nickname.
    #[error("{0}: invalid nickname!")]
    ErroneousNickname(String),

    /// 431: the server considers the nickname empty.
    #[error("No nickname given!")]
    NoNicknameGiven,

    /// 436: nick collision reported by the server.
    #[error("The server answered with a NICKCOLLISION error.")]
    NickCollision,

    /// 403
    #[error("Unable to join {0}: the channel doesn't exist.")]
    NoSuchChannel(String),

    /// 471
    #[error("Unable to join {0}: this channel is full.")]
    ChannelIsFull(String),

    /// 473
    #[error("Unable to join {0}: you are not invited to this channel.")]
    InviteOnly(String),

    /// 474
    #[error("Unable to join {0}: you are banned from this channel!")]
    Banned(String),

    /// 475
    #[error("Unable to join {0}: a password is required; the password given is empty or invalid.")]
    BadChannelKey(String),

    /// 904
    #[error("SASL authentication failed - cannot authenticate.")]
    SaslFailed,

    /// 905
    #[error("SASL authentication failed (too long) - cannot authenticate.")]
    SaslTooLong,
}
