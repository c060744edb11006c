//! Connection and queue configuration

use crate::error::{Error, Result};
use crate::identifier::{Identifier, IdentifierKind};
use serde::Serialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Folder the queue drains.
    pub folder: String,
    pub identifier: IdentifierKind,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `1143`)
    /// - `IMAP_FOLDER` (default: `INBOX`)
    /// - `IMAP_IDENTIFIER` (`uid` or `sequence`, default: `uid`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "1143".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            folder: env::var("IMAP_FOLDER").unwrap_or_else(|_| "INBOX".to_string()),
            identifier: env::var("IMAP_IDENTIFIER")
                .ok()
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// Queue behavior, fixed once the queue is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueConfig {
    /// Never deliver messages that exist when the queue is built.
    pub skip_initial: bool,
    /// Upper bound on a single IDLE wait.
    pub idle_timeout: Duration,
    /// Pause between reconnect attempts.
    pub sleep_on_retry: Duration,
    /// Reconnect attempts before giving up; `None` retries forever.
    pub max_retry: Option<u32>,
    /// Start from this watermark instead of the full backlog.
    pub initial_watermark: Option<Identifier>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            skip_initial: false,
            idle_timeout: Duration::from_secs(30),
            sleep_on_retry: Duration::from_secs(30),
            max_retry: None,
            initial_watermark: None,
        }
    }
}

impl QueueConfig {
    /// Load queue settings from environment variables
    ///
    /// Every variable is optional; unset ones keep the
    /// [`Default`] value:
    /// - `QUEUE_SKIP_INITIAL` (`true`/`false`)
    /// - `QUEUE_IDLE_TIMEOUT_SECS`
    /// - `QUEUE_SLEEP_ON_RETRY_SECS`
    /// - `QUEUE_MAX_RETRY`
    /// - `QUEUE_WATERMARK`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            skip_initial: parse_var("QUEUE_SKIP_INITIAL")?.unwrap_or(defaults.skip_initial),
            idle_timeout: parse_var("QUEUE_IDLE_TIMEOUT_SECS")?
                .map_or(defaults.idle_timeout, Duration::from_secs),
            sleep_on_retry: parse_var("QUEUE_SLEEP_ON_RETRY_SECS")?
                .map_or(defaults.sleep_on_retry, Duration::from_secs),
            max_retry: parse_var("QUEUE_MAX_RETRY")?,
            initial_watermark: parse_var("QUEUE_WATERMARK")?,
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle_timeout must be non-zero".into()));
        }
        if self.initial_watermark == Some(0) {
            return Err(Error::Config("initial_watermark must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
