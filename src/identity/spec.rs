use std::{fmt, str::FromStr};

use crate::common::Error;

/// Largest uid or gid accepted in a spec; ids above it do not survive a round trip through a
/// signed 32-bit `id_t`, and `(uid_t)-1` means "leave unchanged" to the set*id family.
pub const MAX_ID: u32 = i32::MAX as u32;

/// One side of a `user[:group]` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Zero-length: defer to the defaults.
    Empty,
    /// All ASCII digits.
    Id(u32),
    /// Anything else; looked up in the database.
    Name(String),
}

impl Token {
    fn classify(spec: &str, text: &str) -> Result<Token, Error> {
        if text.is_empty() {
            Ok(Token::Empty)
        } else if text.bytes().all(|b| b.is_ascii_digit()) {
            match text.parse::<u32>() {
                Ok(id) if id <= MAX_ID => Ok(Token::Id(id)),
                _ => Err(Error::invalid_spec(
                    spec,
                    format!("uids and gids must be in range 0-{MAX_ID}"),
                )),
            }
        } else if text.contains('\0') {
            Err(Error::invalid_spec(spec, "names cannot contain NUL bytes"))
        } else {
            Ok(Token::Name(text.to_string()))
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Empty => Ok(()),
            Token::Id(id) => write!(f, "{id}"),
            Token::Name(name) => f.write_str(name),
        }
    }
}

/// A `user[:group]` spec, split and classified but not yet looked up.
///
/// The user side is always present (possibly [`Token::Empty`]); `group` is `None` when the spec
/// has no colon, and `Some(Token::Empty)` for a trailing colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSpec {
    pub user: Token,
    pub group: Option<Token>,
}

impl ParsedSpec {
    pub fn parse(spec: &str) -> Result<ParsedSpec, Error> {
        let (user, group) = match spec.split_once(':') {
            Some((user, group)) => (user, Some(group)),
            None => (spec, None),
        };

        // the group database uses ':' as its field separator, no group can be named like this
        if group.is_some_and(|group| group.contains(':')) {
            return Err(Error::invalid_spec(spec, "expected at most one ':'"));
        }

        Ok(ParsedSpec {
            user: Token::classify(spec, user)?,
            group: group.map(|group| Token::classify(spec, group)).transpose()?,
        })
    }
}

impl FromStr for ParsedSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParsedSpec::parse(s)
    }
}

impl fmt::Display for ParsedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user)?;
        if let Some(group) = &self.group {
            write!(f, ":{group}")?;
        }
        Ok(())
    }
}
