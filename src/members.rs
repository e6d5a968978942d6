//! Membership tracker for the watched channel.
//!
//! The set is rebuilt from WHO replies after each join and kept current from
//! JOIN, PART and QUIT traffic. It is only mutated from the receive path, so
//! every inbound line sees the effects of the previous one.

use std::collections::HashSet;

use tracing::info;

use crate::casemap::irc_eq;
use crate::message::RawMessage;
use crate::response::Response;
use crate::user::User;

/// Users currently known to be in the watched channel.
#[derive(Clone, Debug, Default)]
pub struct Members {
    users: HashSet<User>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a hostmask against the tracked set.
    ///
    /// Returns the tracked user with the same identity when there is one,
    /// otherwise a transient [`User`] that is *not* inserted. `None` when the
    /// hostmask is not of the `nick!user@host` form.
    pub fn lookup(&self, hostmask: &str) -> Option<User> {
        let candidate = User::from_hostmask(hostmask)?;
        Some(self.users.get(&candidate).cloned().unwrap_or(candidate))
    }

    pub fn insert(&mut self, user: User) -> bool {
        self.users.insert(user)
    }

    pub fn remove(&mut self, user: &User) -> bool {
        self.users.remove(user)
    }

    pub fn contains(&self, user: &User) -> bool {
        self.users.contains(user)
    }

    /// Find a tracked user by nickname.
    pub fn by_nick(&self, nick: &str) -> Option<&User> {
        self.users.iter().find(|u| irc_eq(&u.nick, nick))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    /// Snapshot of the set, sorted by identity.
    pub fn to_vec(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().cloned().collect();
        users.sort();
        users
    }

    /// Absorb one WHO reply (352) for `channel`.
    ///
    /// The arguments are flattened into words; wherever a word equals the
    /// channel name the reply continues with `user host server nick`, so the
    /// user sits at `+1`, the host at `+2` and the nick at `+4`. A channel
    /// word preceded (two positions back) by the end-of-WHO numeric is not an
    /// entry. Returns the number of users newly added.
    pub fn absorb_who_reply(&mut self, channel: &str, args: &[String]) -> usize {
        let flattened = args.join(" ");
        let words: Vec<&str> = flattened.split_whitespace().collect();
        let end_marker = Response::RPL_ENDOFWHO.to_string();

        let mut added = 0;
        let mut i = 0;
        while i < words.len() {
            let after_end_marker = i >= 2 && words[i - 2] == end_marker;
            if irc_eq(words[i], channel) && !after_end_marker && i + 4 < words.len() {
                let user = User::new(words[i + 4], words[i + 1], words[i + 2]);
                if self.users.insert(user) {
                    added += 1;
                }
                i += 5;
            } else {
                i += 1;
            }
        }
        added
    }

    /// Apply JOIN / PART / QUIT traffic from other users.
    ///
    /// `own_nick` traffic is ignored. PART only counts for `channel`; QUIT
    /// counts regardless of channel. A leave for a user that is not tracked
    /// is ignored without logging.
    pub fn track(&mut self, msg: &RawMessage, channel: &str, own_nick: &str) {
        let on_channel = msg.arg(0).is_some_and(|c| irc_eq(c, channel));

        if msg.is_command("JOIN") && on_channel {
            if let Some(user) = self.lookup(&msg.hostmask) {
                if !irc_eq(&user.nick, own_nick) {
                    info!(nick = %user.nick, "{} joined the channel.", user.nick);
                    self.users.insert(user);
                }
            }
        } else if (msg.is_command("PART") && on_channel) || msg.is_command("QUIT") {
            if let Some(user) = self.lookup(&msg.hostmask) {
                if !irc_eq(&user.nick, own_nick) && self.users.remove(&user) {
                    info!(nick = %user.nick, "{} left the channel.", user.nick);
                }
            }
        }
    }
}
