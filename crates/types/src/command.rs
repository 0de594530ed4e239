use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width in bytes of a command token on the wire.
pub const COMMAND_WIDTH: usize = 8;

/// Fixed-width token naming the concern a message belongs to.
///
/// Tokens are ASCII, right-padded with zero bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Command([u8; COMMAND_WIDTH]);

impl Command {
    /// Build a token at compile time. Panics (at compile time for consts) when
    /// the name is empty, longer than [`COMMAND_WIDTH`] or not ASCII.
    pub const fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        assert!(!bytes.is_empty(), "command token must not be empty");
        assert!(bytes.len() <= COMMAND_WIDTH, "command token too long");
        let mut out = [0u8; COMMAND_WIDTH];
        let mut i = 0;
        while i < bytes.len() {
            assert!(bytes[i].is_ascii() && bytes[i] != 0, "command token must be ASCII");
            out[i] = bytes[i];
            i += 1;
        }
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_WIDTH] {
        &self.0
    }

    /// The token with its zero padding removed.
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(COMMAND_WIDTH);
        std::str::from_utf8(&self.0[..end]).unwrap_or("?")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command token is empty")]
    Empty,
    #[error("command token `{0}` exceeds {COMMAND_WIDTH} bytes")]
    TooLong(String),
    #[error("command token `{0}` is not ASCII")]
    NotAscii(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CommandError::Empty);
        }
        if s.len() > COMMAND_WIDTH {
            return Err(CommandError::TooLong(s.to_string()));
        }
        if !s.bytes().all(|b| b.is_ascii() && b != 0) {
            return Err(CommandError::NotAscii(s.to_string()));
        }
        let mut out = [0u8; COMMAND_WIDTH];
        out[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(out))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self.as_str())
    }
}
