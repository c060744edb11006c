//! Message identifiers
//!
//! The queue hands out plain `u32` identifiers. Whether those are
//! IMAP UIDs or message sequence numbers is decided by the client
//! through [`IdentifierKind`].

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A message UID or sequence number, depending on [`IdentifierKind`].
pub type Identifier = u32;

/// Which numbering the client uses when searching the folder.
///
/// # Examples
///
/// ```
/// use imap_queue::IdentifierKind;
///
/// let kind: IdentifierKind = "seq".parse().unwrap();
/// assert_eq!(kind, IdentifierKind::Sequence);
/// assert_eq!(IdentifierKind::Uid.to_string(), "uid");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Stable unique identifiers (`UID SEARCH`, `UIDNEXT`).
    #[default]
    Uid,
    /// Message sequence numbers (`SEARCH`, `MESSAGES + 1`).
    ///
    /// Sequence numbers shift when messages are expunged, so this is
    /// only safe for folders nobody deletes from.
    Sequence,
}

impl IdentifierKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uid => "uid",
            Self::Sequence => "sequence",
        }
    }

    /// Search criterion matching every identifier `>= from`.
    pub(crate) fn range_from(self, from: Identifier) -> String {
        match self {
            Self::Uid => format!("UID {from}:*"),
            Self::Sequence => format!("{from}:*"),
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("uid") {
            Ok(Self::Uid)
        } else if s.eq_ignore_ascii_case("seq") || s.eq_ignore_ascii_case("sequence") {
            Ok(Self::Sequence)
        } else {
            Err(Error::Config(format!("Unknown identifier kind: {s}")))
        }
    }
}
