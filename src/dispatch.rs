//! Event hooks and the dispatcher that fans events out to handlers.
//!
//! Handlers are registered per [`Hook`] and invoked synchronously, on the
//! caller's task, with the event and a context value (the bot handle in
//! practice). A slow handler therefore delays the processing of the next
//! inbound line.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use pibot::dispatch::{handler, Dispatcher, Event, Hook};
//!
//! let dispatcher: Dispatcher<()> = Dispatcher::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let h = handler(move |_event: &Event, _ctx: &()| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert!(dispatcher.register(Hook::RawMessageSent, h.clone()));
//! assert!(!dispatcher.register(Hook::RawMessageSent, h));
//!
//! dispatcher.fire(Hook::RawMessageSent, &Event::RawSent("PING :x".into()), &());
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ctcp::CtcpEvent;
use crate::message::RawMessage;

/// The points at which external handlers can observe the bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hook {
    /// Every parsed inbound line.
    RawMessageReceived,
    /// A message sent to the watched channel.
    ChannelMessageReceived,
    /// A message sent directly to the bot (not CTCP).
    PrivateMessageReceived,
    /// Either of the two above. Never fires for CTCP requests.
    MessageReceived,
    CtcpRequestReceived,
    /// Every line written to the socket.
    RawMessageSent,
    ChannelMessageSent,
    PrivateMessageSent,
    /// Either of the two above.
    MessageSent,
    NoticeSent,
}

impl Hook {
    pub const ALL: [Hook; 10] = [
        Hook::RawMessageReceived,
        Hook::ChannelMessageReceived,
        Hook::PrivateMessageReceived,
        Hook::MessageReceived,
        Hook::CtcpRequestReceived,
        Hook::RawMessageSent,
        Hook::ChannelMessageSent,
        Hook::PrivateMessageSent,
        Hook::MessageSent,
        Hook::NoticeSent,
    ];

    /// Stable dotted name, handy as a log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::RawMessageReceived => "hook.received.raw",
            Hook::ChannelMessageReceived => "hook.received.channel",
            Hook::PrivateMessageReceived => "hook.received.private",
            Hook::MessageReceived => "hook.received.message",
            Hook::CtcpRequestReceived => "hook.received.ctcp_request",
            Hook::RawMessageSent => "hook.sent.raw",
            Hook::ChannelMessageSent => "hook.sent.channel",
            Hook::PrivateMessageSent => "hook.sent.private",
            Hook::MessageSent => "hook.sent.message",
            Hook::NoticeSent => "hook.sent.notice",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message travelling in either direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    /// Message text.
    pub message: String,
    /// Nick of the sender for received messages, of the bot for sent ones.
    pub user: String,
    /// Channel or nick the message was addressed to.
    pub target: String,
}

/// Value handed to every handler of a hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    RawReceived(RawMessage),
    RawSent(String),
    Message(MessageEvent),
    Ctcp(CtcpEvent),
}

impl Event {
    /// The chat payload, for message hooks.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Event::Message(m) => Some(m),
            _ => None,
        }
    }
}

/// A registered callback.
///
/// Identity is the allocation: registering a clone of the same `Arc` twice
/// is a no-op, while two separately created handlers are distinct even if
/// they wrap the same function.
pub type Handler<C> = Arc<dyn Fn(&Event, &C) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<C, F>(f: F) -> Handler<C>
where
    F: Fn(&Event, &C) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Hook-keyed handler registry.
pub struct Dispatcher<C> {
    handlers: RwLock<HashMap<Hook, Vec<Handler<C>>>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` to the set for `hook`. Returns `false` if that exact
    /// handler was already registered.
    pub fn register(&self, hook: Hook, handler: Handler<C>) -> bool {
        let mut handlers = self.handlers.write();
        let set = handlers.entry(hook).or_default();
        if set.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        set.push(handler);
        true
    }

    /// Remove `handler` from `hook`. Returns `false` if it was not registered.
    pub fn unregister(&self, hook: Hook, handler: &Handler<C>) -> bool {
        let mut handlers = self.handlers.write();
        let Some(set) = handlers.get_mut(&hook) else {
            return false;
        };
        let before = set.len();
        set.retain(|h| !Arc::ptr_eq(h, handler));
        set.len() != before
    }

    pub fn handler_count(&self, hook: Hook) -> usize {
        self.handlers.read().get(&hook).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for `hook`. Returns how many ran.
    ///
    /// The set is snapshotted first, so handlers may register or unregister
    /// without deadlocking; such changes apply from the next `fire`.
    pub fn fire(&self, hook: Hook, event: &Event, ctx: &C) -> usize {
        let snapshot: Vec<Handler<C>> = match self.handlers.read().get(&hook) {
            Some(set) => set.clone(),
            None => return 0,
        };
        for h in &snapshot {
            h(event, ctx);
        }
        snapshot.len()
    }
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut map = f.debug_map();
        for hook in Hook::ALL {
            if let Some(set) = handlers.get(&hook) {
                map.entry(&hook.as_str(), &set.len());
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn message(text: &str) -> Event {
        Event::Message(MessageEvent {
            message: text.to_string(),
            user: "alice".to_string(),
            target: "#test".to_string(),
        })
    }

    #[test]
    fn test_fire_reaches_every_handler_with_same_event() {
        let dispatcher: Dispatcher<Mutex<Vec<String>>> = Dispatcher::new();
        for tag in ["a", "b"] {
            dispatcher.register(
                Hook::MessageReceived,
                handler(move |ev: &Event, log: &Mutex<Vec<String>>| {
                    let text = &ev.as_message().unwrap().message;
                    log.lock().push(format!("{tag}:{text}"));
                }),
            );
        }

        let log = Mutex::new(Vec::new());
        assert_eq!(dispatcher.fire(Hook::MessageReceived, &message("hi"), &log), 2);

        let mut seen = log.into_inner();
        seen.sort();
        assert_eq!(seen, vec!["a:hi", "b:hi"]);
    }

    #[test]
    fn test_hooks_are_isolated() {
        let dispatcher: Dispatcher<Mutex<usize>> = Dispatcher::new();
        dispatcher.register(
            Hook::ChannelMessageReceived,
            handler(|_: &Event, n: &Mutex<usize>| *n.lock() += 1),
        );

        let count = Mutex::new(0);
        assert_eq!(dispatcher.fire(Hook::PrivateMessageReceived, &message("x"), &count), 0);
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let dispatcher: Dispatcher<()> = Dispatcher::new();
        let h = handler(|_: &Event, _: &()| {});

        assert!(dispatcher.register(Hook::NoticeSent, h.clone()));
        assert!(!dispatcher.register(Hook::NoticeSent, h.clone()));
        assert_eq!(dispatcher.handler_count(Hook::NoticeSent), 1);

        // Same handler on another hook is a separate registration.
        assert!(dispatcher.register(Hook::MessageSent, h.clone()));

        assert!(dispatcher.unregister(Hook::NoticeSent, &h));
        assert!(!dispatcher.unregister(Hook::NoticeSent, &h));
        assert_eq!(dispatcher.handler_count(Hook::NoticeSent), 0);
    }

    #[test]
    fn test_handler_may_register_during_fire() {
        let dispatcher: Arc<Dispatcher<()>> = Arc::new(Dispatcher::new());
        let inner = dispatcher.clone();
        dispatcher.register(
            Hook::RawMessageSent,
            handler(move |_: &Event, _: &()| {
                inner.register(Hook::RawMessageSent, handler(|_: &Event, _: &()| {}));
            }),
        );

        assert_eq!(dispatcher.fire(Hook::RawMessageSent, &Event::RawSent("x".into()), &()), 1);
        assert_eq!(dispatcher.handler_count(Hook::RawMessageSent), 2);
    }

    #[test]
    fn test_hook_names_unique() {
        let names: std::collections::HashSet<_> = Hook::ALL.iter().map(Hook::as_str).collect();
        assert_eq!(names.len(), Hook::ALL.len());
    }
}
