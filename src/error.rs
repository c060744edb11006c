//! Error types for imap-queue

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The server rejected a command or sent something unparsable.
    #[error("IMAP error: {0}")]
    Imap(String),

    /// The connection broke while talking to the server.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No folder selected")]
    NotSelected,

    /// The connection dropped during IDLE and could not be restored.
    #[error("Disconnected during IDLE: {0}")]
    Disconnected(#[source] Box<Self>),

    #[error("Gave up reconnecting after {attempts} attempt(s)")]
    RetryExhausted { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Whether the failure came from the connection itself, meaning a
    /// reconnect has a chance of fixing it.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

impl From<async_imap::error::Error> for Error {
    fn from(e: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;

        match e {
            ImapError::Io(io) => Self::Io(io),
            ImapError::ConnectionLost => Self::Transport("connection lost".into()),
            other => Self::Imap(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
