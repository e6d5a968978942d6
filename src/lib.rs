//! # pibot
//!
//! An IRC bot engine that keeps one bot connected to one channel on one
//! network.
//!
//! ## Features
//!
//! - Lenient line codec that never fails on malformed input
//! - Concurrent sender and receiver over a shared dispatch queue
//! - Request correlation by exact command or pattern on the raw line
//! - Registration with nick-collision retry, SASL PLAIN or NickServ
//!   authentication, and level-triggered channel join
//! - Channel membership tracking from WHO, JOIN, PART and QUIT
//! - Ping-timeout watchdog with fixed-delay reconnect
//! - Event hooks for received and sent traffic, including CTCP
//!
//! ## Quick Start
//!
//! ```no_run
//! use pibot::{Bot, BotConfig, Hook};
//!
//! # async fn demo() -> pibot::Result<()> {
//! let config = BotConfig::new("irc.libera.chat", "#pibot");
//! let bot = Bot::new(config);
//!
//! bot.on(Hook::ChannelMessageReceived, |event, bot| {
//!     if let Some(msg) = event.as_message() {
//!         if msg.message == "!hello" {
//!             bot.send_message(&format!("Hello, {}!", msg.user), None);
//!         }
//!     }
//! });
//!
//! bot.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Parsing lines
//!
//! ```rust
//! use pibot::{RawMessage, Response};
//!
//! let msg = RawMessage::parse(":irc.example.com 433 * PiBot :Nickname is already in use");
//! assert_eq!(msg.response(), Some(Response::ERR_NICKNAMEINUSE));
//! assert_eq!(msg.args[1], "PiBot");
//! ```

#![deny(clippy::all)]

pub mod bot;
pub mod casemap;
pub mod config;
pub mod ctcp;
pub mod dispatch;
pub mod error;
pub mod members;
pub mod message;
pub mod queue;
pub mod request;
pub mod response;
pub mod sasl;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod user;

pub use self::bot::Bot;
pub use self::casemap::{irc_eq, irc_to_lower};
pub use self::config::{AuthConfig, AuthMethod, BotConfig};
pub use self::ctcp::{CtcpEvent, CtcpResponder, DefaultResponder};
pub use self::dispatch::{Event, Handler, Hook, MessageEvent};
pub use self::error::{BotError, ConfigError, Result, SessionError};
pub use self::members::Members;
pub use self::message::RawMessage;
pub use self::queue::DispatchQueue;
pub use self::request::{Correlator, OutgoingRequest, RequestHandle};
pub use self::response::Response;
pub use self::state::{BotState, Phase};
pub use self::supervisor::SupervisorStats;
pub use self::transport::MAX_IRC_LINE_LEN;
pub use self::user::User;
