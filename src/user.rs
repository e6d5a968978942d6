//! Channel occupants.

use std::fmt;
use std::str::FromStr;

/// A user seen in the watched channel.
///
/// Identity is the `(nick, user, host)` triple: two values are equal, and
/// hash alike, exactly when all three fields match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct User {
    pub nick: String,
    pub user: String,
    pub host: String,
}

impl User {
    pub fn new(nick: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            user: user.into(),
            host: host.into(),
        }
    }

    /// Split a `nick!user@host` hostmask.
    ///
    /// Returns `None` for server names and other prefixes that lack either
    /// separator.
    pub fn from_hostmask(hostmask: &str) -> Option<User> {
        let (nick, rest) = hostmask.split_once('!')?;
        let (user, host) = rest.split_once('@')?;
        Some(User::new(nick, user, host))
    }

    /// Rebuild the `nick!user@host` form.
    pub fn hostmask(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}@{}", self.nick, self.user, self.host)
    }
}

/// Error returned when a string is not a `nick!user@host` hostmask.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hostmask: {0}")]
pub struct InvalidHostmask(pub String);

impl FromStr for User {
    type Err = InvalidHostmask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        User::from_hostmask(s).ok_or_else(|| InvalidHostmask(s.to_owned()))
    }
}
