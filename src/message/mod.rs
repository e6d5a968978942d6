//! Line codec: one protocol line in, one [`RawMessage`] out.
//!
//! Parsing never fails. A line that cannot be understood yields an empty
//! message (`hostmask`, `command` and `args` all empty) and every consumer
//! treats an empty command as "ignore this line". Some handshake lines have
//! shapes that do not fit the usual grammar, and none of them may take the
//! receive loop down.
//!
//! ```
//! use pibot::RawMessage;
//!
//! let msg = RawMessage::parse(":alice!a@host PRIVMSG #rust :hello there");
//! assert_eq!(msg.hostmask, "alice!a@host");
//! assert_eq!(msg.command, "PRIVMSG");
//! assert_eq!(msg.args, vec!["#rust", "hello there"]);
//!
//! let broken = RawMessage::parse("garbage");
//! assert!(broken.is_empty());
//! ```

use std::fmt;

use crate::response::Response;

/// A parsed protocol line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// Origin prefix without the leading colon: `nick!user@host` or a
    /// server name. Empty when the line had no prefix.
    pub hostmask: String,
    /// Verb (`JOIN`) or three-digit numeric (`433`). Empty on parse failure.
    pub command: String,
    /// Positional parameters in server order. The trailing parameter has its
    /// colon stripped and may contain spaces.
    pub args: Vec<String>,
    /// The line as received, without the terminator.
    pub raw: String,
}

impl RawMessage {
    /// Parse one line (terminator already stripped).
    pub fn parse(line: &str) -> RawMessage {
        let mut tokens = line.split_whitespace().peekable();

        // Tags are never requested, but a server may still send them.
        if tokens.peek().is_some_and(|t| t.starts_with('@')) {
            tokens.next();
        }

        let tokens: Vec<&str> = tokens.collect();
        if tokens.len() < 2 {
            return RawMessage {
                raw: line.to_owned(),
                ..RawMessage::default()
            };
        }

        let (hostmask, rest) = match tokens[0].strip_prefix(':') {
            Some(prefix) => (prefix, &tokens[1..]),
            None => ("", &tokens[..]),
        };

        let command = rest[0];
        let mut args: Vec<String> = Vec::with_capacity(rest.len() - 1);
        let mut in_trailing = false;

        for token in &rest[1..] {
            if in_trailing {
                if let Some(last) = args.last_mut() {
                    last.push(' ');
                    last.push_str(token);
                }
            } else if let Some(trailing) = token.strip_prefix(':') {
                in_trailing = true;
                args.push(trailing.to_owned());
            } else {
                args.push((*token).to_owned());
            }
        }

        RawMessage {
            hostmask: hostmask.to_owned(),
            command: command.to_owned(),
            args,
            raw: line.to_owned(),
        }
    }

    /// `true` if the line could not be parsed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.command.is_empty()
    }

    /// Get the argument at `index`, if present.
    #[inline]
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// The nick part of the hostmask (everything before `!`).
    ///
    /// For server prefixes this is the whole server name.
    pub fn nick(&self) -> &str {
        self.hostmask
            .split_once('!')
            .map_or(self.hostmask.as_str(), |(nick, _)| nick)
    }

    /// The numeric reply carried by this message, if the command is a known
    /// numeric.
    pub fn response(&self) -> Option<Response> {
        self.command.parse().ok()
    }

    /// Case-insensitive command comparison.
    #[inline]
    pub fn is_command(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }
}

impl fmt::Display for RawMessage {
    /// Serialize back to wire form (without terminator).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.hostmask.is_empty() {
            write!(f, ":{} ", self.hostmask)?;
        }
        f.write_str(&self.command)?;

        if let Some((last, middle)) = self.args.split_last() {
            for arg in middle {
                write!(f, " {}", arg)?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}
