//! CTCP (Client-To-Client Protocol) requests and answers.
//!
//! A CTCP request is a private message whose text is wrapped in `\x01`
//! delimiters; the answer travels back as a NOTICE wrapped the same way.
//! The reply text itself comes from a [`CtcpResponder`] so that embedders
//! can replace the canned answers.

/// CTCP delimiter character.
pub const CTCP_DELIM: char = '\x01';

/// Returns the inner request (`VERSION`, `PING 123`, ...) if `text` is a
/// CTCP-wrapped message.
pub fn unwrap_request(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(CTCP_DELIM)?.strip_suffix(CTCP_DELIM)?;
    Some(inner.trim_matches(CTCP_DELIM))
}

/// Wrap an answer in CTCP delimiters: `\x01TYPE text\x01`.
pub fn wrap_answer(answer_type: &str, answer: &str) -> String {
    format!("{CTCP_DELIM}{answer_type} {answer}{CTCP_DELIM}")
}

/// Supplies answer text for CTCP requests.
pub trait CtcpResponder: Send + Sync {
    /// Returns `(answer_type, answer_text)` for an upper-cased request type.
    fn answer(&self, request_type: &str) -> (String, String);
}

/// Canned answers: VERSION, TIME/PING as epoch milliseconds, and `ERRMSG`
/// for everything else.
#[derive(Clone, Debug)]
pub struct DefaultResponder {
    version: String,
}

impl DefaultResponder {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for DefaultResponder {
    fn default() -> Self {
        Self::new(format!("PiBot version {}", env!("CARGO_PKG_VERSION")))
    }
}

impl CtcpResponder for DefaultResponder {
    fn answer(&self, request_type: &str) -> (String, String) {
        match request_type {
            "VERSION" => ("VERSION".to_owned(), self.version.clone()),
            "TIME" | "PING" => (
                request_type.to_owned(),
                chrono::Utc::now().timestamp_millis().to_string(),
            ),
            other => (
                "ERRMSG".to_owned(),
                format!("CTCP request '{}' not supported.", other),
            ),
        }
    }
}

/// Payload of the `ctcp-request-received` hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtcpEvent {
    /// Nick of the requester.
    pub user: String,
    /// Upper-cased request verb.
    pub request_type: String,
    /// Full request text without delimiters.
    pub request: String,
    pub answer_type: String,
    pub answer: String,
}
