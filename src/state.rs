//! Sans-IO session state machine: registration, authentication, channel join.
//!
//! The session performs no I/O. [`Session::begin`] returns the registration
//! lines for a fresh connection and [`Session::feed`] consumes one parsed
//! inbound message and returns the [`SessionAction`]s the caller must carry
//! out: lines to send, hooks to fire, or a fatal error that ends the
//! connection.
//!
//! Phases advance as
//! `Connecting → NickSent → [SaslNegotiating] → Registered → Joining → Joined
//! → [NickServAuthenticating] → Active`.
//!
//! Until the bot has joined its channel the JOIN command is re-sent after
//! every inbound line that did not settle the join one way or the other.
//!
//! # Example
//!
//! ```
//! use pibot::{BotConfig, RawMessage};
//! use pibot::state::{Session, SessionAction};
//!
//! let mut config = BotConfig::new("irc.example.com", "#test");
//! config.nick = "Bot".to_string();
//! let mut session = Session::new(&config);
//!
//! assert_eq!(session.begin(), vec!["NICK Bot", "USER Bot Bot Bot :A Pi-powered IRC bot"]);
//!
//! let actions = session.feed(&RawMessage::parse(":srv 433 * Bot :Nickname is already in use"));
//! assert!(matches!(&actions[..], [SessionAction::Send(line)] if line == "NICK Bot_"));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::casemap::irc_eq;
use crate::config::{AuthMethod, BotConfig};
use crate::ctcp::{self, CtcpEvent, CtcpResponder, DefaultResponder};
use crate::dispatch::{Event, Hook, MessageEvent};
use crate::error::SessionError;
use crate::members::Members;
use crate::message::RawMessage;
use crate::response::Response;
use crate::sasl::{self, SaslMechanism};

/// Where the session stands in the connection lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// No connection attempt yet.
    #[default]
    Connecting,
    /// NICK/USER sent, waiting for the welcome.
    NickSent,
    /// CAP/AUTHENTICATE exchange in progress.
    SaslNegotiating,
    /// Nick accepted (001 received).
    Registered,
    /// JOIN sent, waiting for our own JOIN echo.
    Joining,
    /// In the channel.
    Joined,
    /// IDENTIFY sent to NickServ, waiting for the outcome.
    NickServAuthenticating,
    /// Fully set up.
    Active,
}

/// Observable state of one bot.
#[derive(Clone)]
pub struct BotState {
    /// Current nick; grows a trailing `_` on each collision.
    pub nick: String,
    pub network: String,
    pub port: u16,
    pub channel: String,
    pub channel_password: String,
    pub auth_method: AuthMethod,
    /// Explicit services account; unset means the current nick.
    pub auth_username: Option<String>,
    pub auth_password: String,
    pub joined: bool,
    /// Nick accepted by the server.
    pub registered: bool,
    pub sasl_logged_in: bool,
    pub members: Members,
    pub ping_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl BotState {
    fn from_config(config: &BotConfig) -> Self {
        Self {
            nick: config.nick.clone(),
            network: config.network.clone(),
            port: config.port,
            channel: config.channel.clone(),
            channel_password: config.channel_password.clone(),
            auth_method: config.auth.method,
            auth_username: config.auth.username.clone(),
            auth_password: config.auth.password.clone(),
            joined: false,
            registered: false,
            sasl_logged_in: false,
            members: Members::new(),
            ping_timeout: config.ping_timeout(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

impl BotState {
    /// Account sent in the SASL PLAIN payload.
    pub fn sasl_account(&self) -> &str {
        self.auth_username.as_deref().unwrap_or(&self.nick)
    }
}

impl fmt::Debug for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotState")
            .field("nick", &self.nick)
            .field("network", &self.network)
            .field("port", &self.port)
            .field("channel", &self.channel)
            .field("auth_method", &self.auth_method)
            .field("auth_username", &self.auth_username)
            .field("joined", &self.joined)
            .field("registered", &self.registered)
            .field("sasl_logged_in", &self.sasl_logged_in)
            .field("members", &self.members.len())
            .finish_non_exhaustive()
    }
}

/// What the caller must do after feeding a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// Enqueue this raw line.
    Send(String),
    /// Fire this hook with this event.
    Fire(Hook, Event),
    /// Log at fatal level and tear the connection down without reconnecting.
    Fatal(SessionError),
}

/// Per-bot protocol state machine.
pub struct Session {
    state: BotState,
    phase: Phase,
    configured_nick: String,
    realname: String,
    nickserv: String,
    ctcp: Arc<dyn CtcpResponder>,
}

impl Session {
    pub fn new(config: &BotConfig) -> Self {
        Self::with_responder(config, Arc::new(DefaultResponder::default()))
    }

    pub fn with_responder(config: &BotConfig, ctcp: Arc<dyn CtcpResponder>) -> Self {
        Self {
            state: BotState::from_config(config),
            phase: Phase::Connecting,
            configured_nick: config.nick.clone(),
            realname: config.realname.clone(),
            nickserv: config.auth.nickserv.clone(),
            ctcp,
        }
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn nick(&self) -> &str {
        &self.state.nick
    }

    pub fn members(&self) -> &Members {
        &self.state.members
    }

    /// Reset for a new connection and return the registration lines.
    ///
    /// Membership and the joined/registered flags are cleared; the nick goes
    /// back to the configured one.
    pub fn begin(&mut self) -> Vec<String> {
        self.state.nick = self.configured_nick.clone();
        self.state.joined = false;
        self.state.registered = false;
        self.state.sasl_logged_in = false;
        self.state.members.clear();
        self.phase = Phase::NickSent;

        let mut lines = Vec::with_capacity(3);
        if self.state.auth_method == AuthMethod::Sasl {
            lines.push("CAP LS".to_owned());
            self.phase = Phase::SaslNegotiating;
        }
        let nick = &self.state.nick;
        lines.push(format!("NICK {}", nick));
        lines.push(format!("USER {0} {0} {0} :{1}", nick, self.realname));
        lines
    }

    /// Consume one inbound message.
    pub fn feed(&mut self, msg: &RawMessage) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if msg.is_empty() {
            return actions;
        }

        if msg.is_command("PING") {
            let token = msg.arg(0).unwrap_or_default();
            actions.push(SessionAction::Send(format!("PONG :{}", token)));
            return actions;
        }

        let response = msg.response();

        if response == Some(Response::ERR_ALREADYREGISTERED) {
            actions.push(SessionAction::Fatal(SessionError::AlreadyRegistered));
            return actions;
        }

        if self.state.auth_method == AuthMethod::Sasl && !self.state.sasl_logged_in {
            if let Err(e) = self.negotiate_sasl(msg, response, &mut actions) {
                actions.push(SessionAction::Fatal(e));
                return actions;
            }
        }

        match response {
            Some(Response::ERR_NICKNAMEINUSE) => {
                self.state.nick.push('_');
                warn!("Nick already used, trying with {}...", self.state.nick);
                actions.push(SessionAction::Send(format!("NICK {}", self.state.nick)));
                return actions;
            }
            Some(Response::ERR_ERRONEUSNICKNAME) => {
                let nick = self.state.nick.clone();
                actions.push(SessionAction::Fatal(SessionError::ErroneousNickname(nick)));
                return actions;
            }
            Some(Response::ERR_NONICKNAMEGIVEN) => {
                actions.push(SessionAction::Fatal(SessionError::NoNicknameGiven));
                return actions;
            }
            Some(Response::ERR_NICKCOLLISION) => {
                actions.push(SessionAction::Fatal(SessionError::NickCollision));
                return actions;
            }
            Some(Response::RPL_WELCOME) => {
                self.state.registered = true;
                if self.phase < Phase::Registered {
                    self.phase = Phase::Registered;
                }
                info!(nick = %self.state.nick, "Registered on {}.", self.state.network);
            }
            _ => {}
        }

        if !self.state.joined {
            if let Some(refusal) = response
                .filter(Response::is_join_error)
                .and_then(|r| self.join_refusal(r))
            {
                actions.push(SessionAction::Fatal(refusal));
                return actions;
            }

            if msg.is_command("JOIN") && self.on_channel(msg.arg(0)) && irc_eq(msg.nick(), &self.state.nick)
            {
                self.complete_join(&mut actions);
                return actions;
            }

            actions.push(SessionAction::Send(self.join_line()));
            if self.state.registered && self.phase < Phase::Joining {
                self.phase = Phase::Joining;
            }
        }

        match response {
            Some(Response::RPL_WHOREPLY) => {
                let added = self
                    .state
                    .members
                    .absorb_who_reply(&self.state.channel, &msg.args);
                if added > 0 {
                    debug!(added, total = self.state.members.len(), "WHO reply absorbed");
                }
            }
            Some(Response::RPL_ENDOFWHO) if self.on_channel(msg.arg(1)) => {
                info!(
                    members = self.state.members.len(),
                    "{} users listed in {}.",
                    self.state.members.len(),
                    self.state.channel
                );
            }
            Some(Response::RPL_TOPIC) if self.on_channel(msg.arg(1)) => {
                info!("Topic of {}: {}", self.state.channel, msg.arg(2).unwrap_or_default());
            }
            Some(Response::ERR_NEEDMOREPARAMS) => {
                warn!(
                    command = msg.arg(1).unwrap_or_default(),
                    "The server rejected a command: not enough parameters."
                );
            }
            _ => {}
        }

        if self.state.auth_method == AuthMethod::NickServ {
            match response {
                Some(Response::ERR_NICKLOCKED) => {
                    warn!("The nick {} is currently locked - cannot authenticate.", self.state.nick);
                }
                Some(Response::RPL_LOGGEDIN) => {
                    info!("The bot is now logged in.");
                    self.phase = Phase::Active;
                }
                Some(Response::RPL_LOGGEDOUT) => info!("The bot is now logged out."),
                _ => {}
            }
        }

        self.state
            .members
            .track(msg, &self.state.channel, &self.state.nick);

        if msg.is_command("PRIVMSG") {
            self.on_privmsg(msg, &mut actions);
        }

        actions
    }

    fn negotiate_sasl(
        &mut self,
        msg: &RawMessage,
        response: Option<Response>,
        actions: &mut Vec<SessionAction>,
    ) -> Result<(), SessionError> {
        if msg.is_command("CAP") {
            let sub = msg.arg(1).map(str::to_ascii_uppercase);
            let offers_sasl = msg
                .args
                .iter()
                .skip(2)
                .flat_map(|a| a.split_whitespace())
                .any(|cap| cap.eq_ignore_ascii_case("sasl") || cap.to_ascii_lowercase().starts_with("sasl="));

            match sub.as_deref() {
                // `CAP * LS * :...` is a continuation; wait for the last line.
                Some("LS") if msg.arg(2) != Some("*") => {
                    actions.push(SessionAction::Send("CAP REQ :sasl".to_owned()));
                }
                Some("ACK") if offers_sasl => {
                    actions.push(SessionAction::Send("AUTHENTICATE PLAIN".to_owned()));
                }
                Some("NAK") => {
                    warn!("The server refused the sasl capability.");
                    actions.push(SessionAction::Send("CAP END".to_owned()));
                }
                _ => {}
            }
        } else if msg.is_command("AUTHENTICATE") && msg.arg(0) == Some("+") {
            let account = self.state.sasl_account();
            let encoded = sasl::encode_plain(account, account, &self.state.auth_password);
            actions.extend(sasl::authenticate_lines(&encoded).into_iter().map(SessionAction::Send));
        }

        match response {
            Some(Response::RPL_SASLSUCCESS) => {
                self.state.sasl_logged_in = true;
                info!("SASL authentication successful - the bot is now logged in.");
                actions.push(SessionAction::Send("CAP END".to_owned()));
                if self.phase == Phase::SaslNegotiating {
                    self.phase = Phase::NickSent;
                }
            }
            Some(Response::ERR_SASLFAIL) => return Err(SessionError::SaslFailed),
            Some(Response::ERR_SASLTOOLONG) => return Err(SessionError::SaslTooLong),
            Some(Response::ERR_SASLABORTED) => {
                warn!("SASL authentication aborted.");
                actions.push(SessionAction::Send("CAP END".to_owned()));
            }
            Some(Response::ERR_SASLALREADY) => {
                warn!("SASL authentication failed - you are already logged in.");
                actions.push(SessionAction::Send("CAP END".to_owned()));
            }
            Some(Response::RPL_SASLMECHS) => {
                let mechanisms = sasl::parse_mechanisms(msg.arg(1).unwrap_or_default());
                if !mechanisms.contains(&SaslMechanism::Plain) {
                    warn!(
                        offered = %msg.arg(1).unwrap_or_default(),
                        "The server does not offer SASL PLAIN."
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn complete_join(&mut self, actions: &mut Vec<SessionAction>) {
        self.state.joined = true;
        self.phase = Phase::Joined;
        info!("Connected to {}.", self.state.channel);

        actions.push(SessionAction::Send(format!("WHO {}", self.state.channel)));

        if self.state.auth_method == AuthMethod::NickServ {
            actions.push(SessionAction::Send(format!(
                "PRIVMSG {} :IDENTIFY {}",
                self.nickserv, self.state.auth_password
            )));
            self.phase = Phase::NickServAuthenticating;
        } else {
            self.phase = Phase::Active;
        }
    }

    fn join_refusal(&self, response: Response) -> Option<SessionError> {
        let channel = self.state.channel.clone();
        Some(match response {
            Response::ERR_NOSUCHCHANNEL => SessionError::NoSuchChannel(channel),
            Response::ERR_CHANNELISFULL => SessionError::ChannelIsFull(channel),
            Response::ERR_INVITEONLYCHAN => SessionError::InviteOnly(channel),
            Response::ERR_BANNEDFROMCHAN => SessionError::Banned(channel),
            Response::ERR_BADCHANNELKEY => SessionError::BadChannelKey(channel),
            _ => return None,
        })
    }

    fn join_line(&self) -> String {
        if self.state.channel_password.is_empty() {
            format!("JOIN {}", self.state.channel)
        } else {
            format!("JOIN {} {}", self.state.channel, self.state.channel_password)
        }
    }

    fn on_channel(&self, name: Option<&str>) -> bool {
        name.is_some_and(|n| irc_eq(n, &self.state.channel))
    }

    fn on_privmsg(&self, msg: &RawMessage, actions: &mut Vec<SessionAction>) {
        let (Some(target), Some(text)) = (msg.arg(0), msg.arg(1)) else {
            return;
        };
        let user = msg.nick().to_owned();

        if irc_eq(target, &self.state.channel) {
            let event = Event::Message(MessageEvent {
                message: text.to_owned(),
                user,
                target: target.to_owned(),
            });
            actions.push(SessionAction::Fire(Hook::ChannelMessageReceived, event.clone()));
            actions.push(SessionAction::Fire(Hook::MessageReceived, event));
        } else if let Some(request) = ctcp::unwrap_request(text) {
            info!("CTCP request received from {}: {}", user, request);

            let request_type = request
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            let (answer_type, answer) = self.ctcp.answer(&request_type);

            let notice = format!(
                "NOTICE {} :{}",
                user,
                ctcp::wrap_answer(&answer_type, &answer)
            );
            actions.push(SessionAction::Fire(
                Hook::CtcpRequestReceived,
                Event::Ctcp(CtcpEvent {
                    user,
                    request_type,
                    request: request.to_owned(),
                    answer_type,
                    answer,
                }),
            ));
            actions.push(SessionAction::Send(notice));
        } else {
            let event = Event::Message(MessageEvent {
                message: text.to_owned(),
                user,
                target: target.to_owned(),
            });
            actions.push(SessionAction::Fire(Hook::PrivateMessageReceived, event.clone()));
            actions.push(SessionAction::Fire(Hook::MessageReceived, event));
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(method: AuthMethod) -> BotConfig {
        let mut config = BotConfig::new("irc.example.com", "#test");
        config.nick = "Bot".to_string();
        config.auth.method = method;
        if method != AuthMethod::None {
            config.auth.password = "secret".to_string();
        }
        config
    }

    fn session(method: AuthMethod) -> Session {
        let mut session = Session::new(&config(method));
        let _ = session.begin();
        session
    }

    fn feed(session: &mut Session, line: &str) -> Vec<SessionAction> {
        session.feed(&RawMessage::parse(line))
    }

    fn sent(actions: &[SessionAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    fn fatal(actions: &[SessionAction]) -> Option<&SessionError> {
        actions.iter().find_map(|a| match a {
            SessionAction::Fatal(e) => Some(e),
            _ => None,
        })
    }

    fn join(session: &mut Session) {
        let actions = feed(session, ":Bot!b@host JOIN #test");
        assert!(session.state().joined, "join echo should mark joined: {actions:?}");
    }

    #[test]
    fn test_begin_sends_registration() {
        let mut session = Session::new(&config(AuthMethod::None));
        assert_eq!(
            session.begin(),
            vec!["NICK Bot", "USER Bot Bot Bot :A Pi-powered IRC bot"]
        );
        assert_eq!(session.phase(), Phase::NickSent);
    }

    #[test]
    fn test_begin_with_sasl_requests_caps_first() {
        let mut session = Session::new(&config(AuthMethod::Sasl));
        let lines = session.begin();
        assert_eq!(lines[0], "CAP LS");
        assert_eq!(lines.len(), 3);
        assert_eq!(session.phase(), Phase::SaslNegotiating);
    }

    #[test]
    fn test_nick_in_use_appends_underscore() {
        let mut session = session(AuthMethod::None);
        let actions = feed(&mut session, ":srv 433 * Bot :Nickname is already in use");

        assert_eq!(actions, vec![SessionAction::Send("NICK Bot_".to_string())]);
        assert_eq!(session.nick(), "Bot_");
        assert!(!session.state().joined);

        // No cap on retries.
        for _ in 0..20 {
            feed(&mut session, ":srv 433 * Bot :Nickname is already in use");
        }
        assert_eq!(session.nick(), format!("Bot{}", "_".repeat(21)));
    }

    #[test]
    fn test_fatal_nick_errors() {
        for (code, expected) in [
            ("432", SessionError::ErroneousNickname("Bot".to_string())),
            ("431", SessionError::NoNicknameGiven),
            ("436", SessionError::NickCollision),
            ("462", SessionError::AlreadyRegistered),
        ] {
            let mut session = session(AuthMethod::None);
            let actions = feed(&mut session, &format!(":srv {code} Bot :error"));
            assert_eq!(fatal(&actions), Some(&expected), "code {code}");
            assert!(sent(&actions).is_empty(), "code {code} should send nothing");
        }
    }

    #[test]
    fn test_join_retried_on_every_line_until_joined() {
        let mut session = session(AuthMethod::None);

        for line in [":srv 001 Bot :Welcome", ":srv 372 Bot :- motd", ":srv 376 Bot :End"] {
            let actions = feed(&mut session, line);
            assert_eq!(sent(&actions), vec!["JOIN #test"]);
        }
        assert_eq!(session.phase(), Phase::Joining);
        assert!(session.state().registered);

        let actions = feed(&mut session, ":Bot!b@host JOIN #test");
        assert_eq!(sent(&actions), vec!["WHO #test"]);
        assert!(session.state().joined);
        assert_eq!(session.phase(), Phase::Active);

        let actions = feed(&mut session, ":srv 372 Bot :- more");
        assert!(sent(&actions).is_empty());
    }

    #[test]
    fn test_join_uses_channel_password() {
        let mut config = config(AuthMethod::None);
        config.channel_password = "key".to_string();
        let mut session = Session::new(&config);
        session.begin();

        let actions = feed(&mut session, ":srv NOTICE * :Looking up your hostname");
        assert_eq!(sent(&actions), vec!["JOIN #test key"]);
    }

    #[test]
    fn test_join_refusals_are_fatal_and_distinct() {
        let mut seen = Vec::new();
        for code in ["403", "471", "473", "474", "475"] {
            let mut session = session(AuthMethod::None);
            let actions = feed(&mut session, &format!(":srv {code} Bot #test :Cannot join"));
            let err = fatal(&actions).cloned().expect("join refusal is fatal");
            assert!(sent(&actions).is_empty());
            seen.push(err.to_string());
        }
        let distinct: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 5);
    }

    #[test]
    fn test_join_refusal_ignored_once_joined() {
        let mut session = session(AuthMethod::None);
        join(&mut session);
        let actions = feed(&mut session, ":srv 474 Bot #other :Cannot join");
        assert!(fatal(&actions).is_none());
    }

    #[test]
    fn test_other_users_join_before_own_join() {
        let mut session = session(AuthMethod::None);
        let actions = feed(&mut session, ":alice!a@h JOIN #test");

        assert!(!session.state().joined);
        assert_eq!(sent(&actions), vec!["JOIN #test"]);
        assert!(session.members().by_nick("alice").is_some());
    }

    #[test]
    fn test_nickserv_identify_after_join() {
        let mut session = session(AuthMethod::NickServ);
        let actions = feed(&mut session, ":Bot!b@host JOIN :#test");

        assert_eq!(
            sent(&actions),
            vec!["WHO #test", "PRIVMSG NickServ :IDENTIFY secret"]
        );
        assert_eq!(session.phase(), Phase::NickServAuthenticating);

        feed(&mut session, ":srv 900 Bot Bot!b@host Bot :You are now logged in as Bot");
        assert_eq!(session.phase(), Phase::Active);
    }

    #[test]
    fn test_sasl_plain_flow() {
        let mut session = session(AuthMethod::Sasl);

        let actions = feed(&mut session, ":srv CAP * LS :multi-prefix sasl");
        assert_eq!(sent(&actions)[0], "CAP REQ :sasl");

        let actions = feed(&mut session, ":srv CAP Bot ACK :sasl");
        assert_eq!(sent(&actions)[0], "AUTHENTICATE PLAIN");

        let actions = feed(&mut session, "AUTHENTICATE +");
        let expected = format!("AUTHENTICATE {}", sasl::encode_plain("Bot", "Bot", "secret"));
        assert_eq!(sent(&actions)[0], expected);

        let actions = feed(&mut session, ":srv 903 Bot :SASL authentication successful");
        assert!(session.state().sasl_logged_in);
        assert_eq!(sent(&actions)[0], "CAP END");

        // Once logged in, CAP traffic is no longer answered.
        let actions = feed(&mut session, ":srv CAP * LS :sasl");
        assert!(!sent(&actions).contains(&"CAP REQ :sasl"));
    }

    #[test]
    fn test_sasl_account_follows_current_nick() {
        let mut session = session(AuthMethod::Sasl);
        feed(&mut session, ":srv 433 * Bot :Nickname is already in use");
        assert_eq!(session.nick(), "Bot_");

        let actions = feed(&mut session, "AUTHENTICATE +");
        let expected = format!("AUTHENTICATE {}", sasl::encode_plain("Bot_", "Bot_", "secret"));
        assert_eq!(sent(&actions)[0], expected);
    }

    #[test]
    fn test_sasl_explicit_account_survives_nick_collision() {
        let mut config = config(AuthMethod::Sasl);
        config.auth.username = Some("botaccount".to_string());
        let mut session = Session::new(&config);
        let _ = session.begin();
        feed(&mut session, ":srv 433 * Bot :Nickname is already in use");

        let actions = feed(&mut session, "AUTHENTICATE +");
        let expected = format!(
            "AUTHENTICATE {}",
            sasl::encode_plain("botaccount", "botaccount", "secret")
        );
        assert_eq!(sent(&actions)[0], expected);
        assert_eq!(session.state().sasl_account(), "botaccount");
    }

    #[test]
    fn test_sasl_multiline_ls_waits_for_last_line() {
        let mut session = session(AuthMethod::Sasl);
        let actions = feed(&mut session, ":srv CAP * LS * :multi-prefix");
        assert!(!sent(&actions).contains(&"CAP REQ :sasl"));
        let actions = feed(&mut session, ":srv CAP * LS :sasl");
        assert!(sent(&actions).contains(&"CAP REQ :sasl"));
    }

    #[test]
    fn test_sasl_failures() {
        let mut session = session(AuthMethod::Sasl);
        let actions = feed(&mut session, ":srv 904 Bot :SASL authentication failed");
        assert_eq!(fatal(&actions), Some(&SessionError::SaslFailed));

        let mut session = self::session(AuthMethod::Sasl);
        let actions = feed(&mut session, ":srv 905 Bot :SASL message too long");
        assert_eq!(fatal(&actions), Some(&SessionError::SaslTooLong));

        let mut session = self::session(AuthMethod::Sasl);
        let actions = feed(&mut session, ":srv 906 Bot :SASL authentication aborted");
        assert!(fatal(&actions).is_none());
        assert!(sent(&actions).contains(&"CAP END"));
    }

    #[test]
    fn test_sasl_numerics_ignored_without_sasl() {
        let mut session = session(AuthMethod::None);
        let actions = feed(&mut session, ":srv 904 Bot :SASL authentication failed");
        assert!(fatal(&actions).is_none());
    }

    #[test]
    fn test_ping_answered_without_join_retry() {
        let mut session = session(AuthMethod::None);
        let actions = feed(&mut session, "PING :irc.example.com");
        assert_eq!(
            actions,
            vec![SessionAction::Send("PONG :irc.example.com".to_string())]
        );
    }

    #[test]
    fn test_unparseable_line_is_ignored() {
        let mut session = session(AuthMethod::None);
        assert!(feed(&mut session, "garbage").is_empty());
    }

    #[test]
    fn test_channel_message_fires_channel_and_message_hooks() {
        let mut session = session(AuthMethod::None);
        join(&mut session);
        let actions = feed(&mut session, ":alice!a@h PRIVMSG #test :hi there");

        let expected = Event::Message(MessageEvent {
            message: "hi there".to_string(),
            user: "alice".to_string(),
            target: "#test".to_string(),
        });
        assert_eq!(
            actions,
            vec![
                SessionAction::Fire(Hook::ChannelMessageReceived, expected.clone()),
                SessionAction::Fire(Hook::MessageReceived, expected),
            ]
        );
    }

    #[test]
    fn test_private_message_hooks() {
        let mut session = session(AuthMethod::None);
        join(&mut session);
        let actions = feed(&mut session, ":alice!a@h PRIVMSG Bot :psst");
        let hooks: Vec<Hook> = actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Fire(hook, _) => Some(*hook),
                _ => None,
            })
            .collect();
        assert_eq!(hooks, vec![Hook::PrivateMessageReceived, Hook::MessageReceived]);
    }

    #[test]
    fn test_ctcp_request_answered_with_notice() {
        struct Fixed;
        impl CtcpResponder for Fixed {
            fn answer(&self, request_type: &str) -> (String, String) {
                (request_type.to_string(), "fixed".to_string())
            }
        }

        let mut session = Session::with_responder(&config(AuthMethod::None), Arc::new(Fixed));
        session.begin();
        join(&mut session);

        let actions = feed(&mut session, ":alice!a@h PRIVMSG Bot :\x01version\x01");
        assert_eq!(actions.len(), 2);
        match &actions[0] {
            SessionAction::Fire(Hook::CtcpRequestReceived, Event::Ctcp(ev)) => {
                assert_eq!(ev.request_type, "VERSION");
                assert_eq!(ev.user, "alice");
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(
            actions[1],
            SessionAction::Send("NOTICE alice :\x01VERSION fixed\x01".to_string())
        );
    }

    #[test]
    fn test_who_reply_fills_members() {
        let mut session = session(AuthMethod::None);
        join(&mut session);
        feed(&mut session, ":srv 352 Bot #test alice h1 srv alice H :0 Alice");
        feed(&mut session, ":srv 352 Bot #test alice h1 srv alice H :0 Alice");
        feed(&mut session, ":srv 315 Bot #test :End of /WHO list.");

        assert_eq!(session.members().len(), 1);
    }

    #[test]
    fn test_begin_resets_connection_state() {
        let mut session = session(AuthMethod::None);
        feed(&mut session, ":srv 433 * Bot :in use");
        feed(&mut session, ":srv 001 Bot_ :Welcome");
        feed(&mut session, ":Bot_!b@host JOIN #test");
        feed(&mut session, ":alice!a@h JOIN #test");
        assert!(session.state().joined);
        assert_eq!(session.members().len(), 1);

        session.begin();
        assert!(!session.state().joined);
        assert!(!session.state().registered);
        assert!(session.members().is_empty());
        assert_eq!(session.nick(), "Bot");
    }
}
