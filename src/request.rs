//! Outgoing requests and the correlator that routes replies back to them.
//!
//! A request is a raw line plus an optional callback and a set of expected
//! answers. Opening it enqueues the line; if it has a callback, every inbound
//! message accepted by one of its expectations is handed to that callback
//! until the request is closed. Each call site declares its own filter, so
//! interleaved exchanges (a WHO listing, a SASL negotiation, ...) do not need
//! to know about each other.
//!
//! ```
//! use pibot::{DispatchQueue, RawMessage};
//! use pibot::request::{Correlator, OutgoingRequest};
//!
//! let queue = DispatchQueue::new();
//! let correlator = Correlator::new();
//!
//! let handle = correlator.register(
//!     OutgoingRequest::new("WHO #rust")
//!         .expect("352")
//!         .expect("315")
//!         .on_reply(|msg, handle| {
//!             if msg.command == "315" {
//!                 handle.close();
//!             }
//!         }),
//!     &queue,
//! );
//!
//! assert_eq!(queue.try_dequeue().as_deref(), Some("WHO #rust"));
//! correlator.route(&RawMessage::parse(":srv 315 Bot #rust :End of WHO"));
//! assert!(!handle.is_open());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::message::RawMessage;
use crate::queue::DispatchQueue;

/// Callback invoked for each matching reply.
pub type ReplyCallback = Arc<dyn Fn(&RawMessage, &RequestHandle) + Send + Sync>;

/// One accepted answer: an exact command or a pattern over the raw line.
#[derive(Clone, Debug)]
pub struct Expectation {
    text: String,
    pattern: Option<Regex>,
}

impl Expectation {
    /// The pattern is anchored at the start of the line. Text that is not a
    /// valid regular expression only matches commands exactly.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let pattern = match Regex::new(&format!("^(?:{})", text)) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!(expectation = %text, error = %e, "expectation is not a valid pattern");
                None
            }
        };
        Self { text, pattern }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Exact command equality first, then the pattern against the raw line.
    pub fn matches(&self, msg: &RawMessage) -> bool {
        msg.command == self.text
            || self
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(&msg.raw))
    }
}

impl PartialEq for Expectation {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// A line to send, with an optional reply filter and callback.
#[derive(Clone, Default)]
pub struct OutgoingRequest {
    payload: String,
    expected: Vec<Expectation>,
    callback: Option<ReplyCallback>,
}

impl OutgoingRequest {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Accept replies matching `answer`. Duplicates are ignored. With no
    /// expectations at all, every inbound message is accepted.
    pub fn expect(mut self, answer: impl Into<String>) -> Self {
        let expectation = Expectation::new(answer);
        if !self.expected.contains(&expectation) {
            self.expected.push(expectation);
        }
        self
    }

    pub fn expect_all<I, S>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        answers.into_iter().fold(self, |req, a| req.expect(a))
    }

    pub fn on_reply<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RawMessage, &RequestHandle) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expected
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("payload", &self.payload)
            .field("expected", &self.expected)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

type OpenSet = Mutex<Vec<Arc<OpenRequest>>>;

struct OpenRequest {
    id: u64,
    open: AtomicBool,
    payload: String,
    expected: Vec<Expectation>,
    callback: Option<ReplyCallback>,
    registry: Weak<OpenSet>,
}

impl OpenRequest {
    fn accepts(&self, msg: &RawMessage) -> bool {
        self.expected.is_empty() || self.expected.iter().any(|e| e.matches(msg))
    }
}

/// Handle to an opened request.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<OpenRequest>,
}

impl RequestHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn payload(&self) -> &str {
        &self.inner.payload
    }

    /// `true` until the request is closed. Fire-and-forget requests are never
    /// open.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Stop delivering replies. Idempotent.
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.lock().retain(|r| r.id != self.inner.id);
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.inner.id)
            .field("payload", &self.inner.payload)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Routes inbound messages to open requests.
pub struct Correlator {
    open: Arc<OpenSet>,
    next_id: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            open: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue the request's payload and, if it has a callback, start
    /// routing replies to it.
    pub fn register(&self, request: OutgoingRequest, queue: &DispatchQueue) -> RequestHandle {
        let OutgoingRequest {
            payload,
            expected,
            callback,
        } = request;

        let tracked = callback.is_some();
        let inner = Arc::new(OpenRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            open: AtomicBool::new(tracked),
            payload: payload.clone(),
            expected,
            callback,
            registry: Arc::downgrade(&self.open),
        });

        if tracked {
            self.open.lock().push(inner.clone());
        }
        queue.enqueue(payload);

        RequestHandle { inner }
    }

    /// Hand `msg` to every open request that accepts it. Returns how many
    /// callbacks ran.
    ///
    /// Callbacks run on a snapshot of the open set taken before the first
    /// one is invoked, so a callback may close its own request or register
    /// new ones; a request closed mid-route is skipped.
    pub fn route(&self, msg: &RawMessage) -> usize {
        let snapshot: Vec<Arc<OpenRequest>> = self.open.lock().clone();
        let mut delivered = 0;

        for request in snapshot {
            if !request.open.load(Ordering::Acquire) || !request.accepts(msg) {
                continue;
            }
            if let Some(callback) = &request.callback {
                let handle = RequestHandle {
                    inner: request.clone(),
                };
                callback(msg, &handle);
                delivered += 1;
            }
        }
        delivered
    }

    /// Close a request. Same as [`RequestHandle::close`].
    pub fn close(&self, handle: &RequestHandle) {
        handle.close();
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    /// Close every open request.
    pub fn close_all(&self) {
        let drained: Vec<Arc<OpenRequest>> = std::mem::take(&mut *self.open.lock());
        for request in drained {
            request.open.store(false, Ordering::Release);
        }
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("open", &self.open_count())
            .finish()
    }
}
