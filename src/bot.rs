//! The bot handle.
//!
//! [`Bot`] is a cheap, cloneable handle around everything one bot owns: its
//! configuration, the dispatch queue, the request correlator, the hook
//! dispatcher, the session state machine and the connection supervisor.
//! Event handlers receive a `&Bot` and may send, open requests or stop the
//! bot from inside the callback.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::casemap::irc_eq;
use crate::config::BotConfig;
use crate::ctcp::{self, CtcpResponder};
use crate::dispatch::{self, Dispatcher, Event, Handler, Hook, MessageEvent};
use crate::message::RawMessage;
use crate::queue::DispatchQueue;
use crate::request::{Correlator, OutgoingRequest, RequestHandle};
use crate::state::{BotState, Phase, Session, SessionAction};
use crate::supervisor::Supervisor;
use crate::user::User;

struct BotInner {
    config: BotConfig,
    queue: DispatchQueue,
    correlator: Correlator,
    dispatcher: Dispatcher<Bot>,
    session: Mutex<Session>,
    supervisor: Supervisor,
}

/// One bot on one network and one channel.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    pub fn new(config: BotConfig) -> Self {
        let session = Session::new(&config);
        Self::with_session(config, session)
    }

    /// Use `responder` instead of the canned CTCP answers.
    pub fn with_ctcp_responder(config: BotConfig, responder: Arc<dyn CtcpResponder>) -> Self {
        let session = Session::with_responder(&config, responder);
        Self::with_session(config, session)
    }

    fn with_session(config: BotConfig, session: Session) -> Self {
        Self {
            inner: Arc::new(BotInner {
                config,
                queue: DispatchQueue::new(),
                correlator: Correlator::new(),
                dispatcher: Dispatcher::new(),
                session: Mutex::new(session),
                supervisor: Supervisor::new(),
            }),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.inner.queue
    }

    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub(crate) fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> BotState {
        self.inner.session.lock().state().clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.session.lock().phase()
    }

    /// Current nick, including any `_` added after collisions.
    pub fn nick(&self) -> String {
        self.inner.session.lock().nick().to_owned()
    }

    pub fn is_joined(&self) -> bool {
        self.inner.session.lock().state().joined
    }

    /// Users currently tracked in the channel, sorted.
    pub fn members(&self) -> Vec<User> {
        self.inner.session.lock().members().to_vec()
    }

    /// Register `f` for `hook` and return the handler so it can be
    /// unregistered later.
    pub fn on<F>(&self, hook: Hook, f: F) -> Handler<Bot>
    where
        F: Fn(&Event, &Bot) + Send + Sync + 'static,
    {
        let handler = dispatch::handler(f);
        self.inner.dispatcher.register(hook, handler.clone());
        handler
    }

    /// Register an existing handler. Returns `false` if it already was.
    pub fn register(&self, hook: Hook, handler: Handler<Bot>) -> bool {
        self.inner.dispatcher.register(hook, handler)
    }

    pub fn unregister(&self, hook: Hook, handler: &Handler<Bot>) -> bool {
        self.inner.dispatcher.unregister(hook, handler)
    }

    /// Fire `hook` with `event`. Returns the number of handlers invoked.
    pub fn fire(&self, hook: Hook, event: &Event) -> usize {
        self.inner.dispatcher.fire(hook, event, self)
    }

    /// Queue a raw protocol line.
    pub fn raw(&self, line: impl Into<String>) {
        self.inner.queue.enqueue(line);
    }

    /// Send a PRIVMSG to `target`, or to the channel when `None`.
    pub fn send_message(&self, text: &str, target: Option<&str>) {
        let channel = &self.inner.config.channel;
        let target = target.unwrap_or(channel);
        self.raw(format!("PRIVMSG {} :{}", target, text));

        let event = Event::Message(MessageEvent {
            message: text.to_owned(),
            user: self.nick(),
            target: target.to_owned(),
        });
        let hook = if irc_eq(target, channel) {
            Hook::ChannelMessageSent
        } else {
            Hook::PrivateMessageSent
        };
        self.fire(hook, &event);
        self.fire(Hook::MessageSent, &event);
    }

    /// Send a NOTICE to `target`, or to the channel when `None`.
    pub fn send_notice(&self, text: &str, target: Option<&str>) {
        let target = target.unwrap_or(&self.inner.config.channel);
        self.raw(format!("NOTICE {} :{}", target, text));

        let event = Event::Message(MessageEvent {
            message: text.to_owned(),
            user: self.nick(),
            target: target.to_owned(),
        });
        self.fire(Hook::NoticeSent, &event);
    }

    /// Answer a CTCP request from `user`.
    pub fn send_ctcp_answer(&self, answer_type: &str, answer: &str, user: &str) {
        self.send_notice(&ctcp::wrap_answer(answer_type, answer), Some(user));
    }

    /// Open a request: queue its payload and, if it has a callback, route
    /// matching replies to it until closed.
    pub fn request(&self, request: OutgoingRequest) -> RequestHandle {
        self.inner.correlator.register(request, &self.inner.queue)
    }

    /// Process one inbound line (terminator stripped).
    ///
    /// The line is parsed, routed to open requests, fired on the raw-received
    /// hook and fed to the session. A panic anywhere in that chain, including
    /// in a handler, is logged and swallowed so the next line is processed
    /// normally.
    pub fn handle_line(&self, line: &str) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_line(line)));
        if let Err(payload) = result {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!(line, "Processing an inbound line panicked: {}", reason);
        }
    }

    fn process_line(&self, line: &str) {
        debug!("« {}", line);
        let msg = RawMessage::parse(line);
        if msg.is_empty() {
            return;
        }

        self.inner.correlator.route(&msg);
        self.fire(Hook::RawMessageReceived, &Event::RawReceived(msg.clone()));

        // Released before any action runs: handlers may call back into the
        // session.
        let actions = self.inner.session.lock().feed(&msg);
        self.apply(actions);
    }

    fn apply(&self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send(line) => self.raw(line),
                SessionAction::Fire(hook, event) => {
                    self.fire(hook, &event);
                }
                SessionAction::Fatal(err) => {
                    error!("{} Aborting.", err);
                    self.stop();
                    return;
                }
            }
        }
    }

    /// Reset the session for a new connection; returns registration lines.
    pub(crate) fn begin_session(&self) -> Vec<String> {
        self.inner.session.lock().begin()
    }
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("network", &self.inner.config.network)
            .field("channel", &self.inner.config.channel)
            .field("session", &*self.inner.session.lock())
            .field("handlers", &self.inner.dispatcher)
            .field("supervisor", &self.inner.supervisor.stats())
            .finish()
    }
}
