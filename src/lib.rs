//! FIFO queue of IMAP message identifiers
//!
//! Drain a mailbox folder one message at a time without polling.
//! [`MailQueue`] fetches new identifiers when its buffer runs dry and
//! waits in IMAP IDLE when there is nothing new, reconnecting on its
//! own when the connection drops.
//!
//! The queue talks to the server through the [`MailClient`] trait.
//! [`ImapMailClient`] implements it over `async-imap` with STARTTLS.
//!
//! ```no_run
//! # async fn run() -> imap_queue::Result<()> {
//! use imap_queue::{ImapConfig, ImapMailClient, MailQueue, QueueConfig};
//!
//! let client = ImapMailClient::connect(ImapConfig::from_env()?).await?;
//! let mut queue = MailQueue::new(client, QueueConfig::from_env()?).await?;
//! let uid = queue.dequeue_message().await?;
//! # Ok(())
//! # }
//! ```

mod capability;
mod client;
mod config;
mod connection;
mod error;
mod identifier;
mod queue;

pub use capability::{MailClient, WaitOutcome};
pub use client::{IdleHandle, ImapMailClient};
pub use config::{ImapConfig, QueueConfig};
pub use error::{Error, Result};
pub use identifier::{Identifier, IdentifierKind};
pub use queue::{MailQueue, MailQueueBuilder};
