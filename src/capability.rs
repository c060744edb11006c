//! The mail client capability the queue drives
//!
//! [`MailQueue`](crate::MailQueue) never speaks IMAP itself. Everything
//! that touches the server goes through [`MailClient`], so the queue
//! can run on top of [`ImapMailClient`](crate::ImapMailClient) or any
//! other implementation (the tests use an in-memory one).

use crate::error::Result;
use crate::identifier::Identifier;
use std::future::Future;
use std::time::Duration;

/// How a wait in IDLE mode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The server reported a change in the folder.
    Updated,
    /// The timeout elapsed without any server activity.
    TimedOut,
    /// The wait was cut short locally.
    Interrupted,
}

/// Operations a mailbox connection must offer to back a queue.
///
/// Identifiers are whatever the implementation searches by (UIDs or
/// sequence numbers), but they must be strictly increasing in
/// delivery order and [`next_identifier_watermark`] must be measured
/// on the same scale.
///
/// Implementations should report a broken connection as
/// [`Error::Transport`](crate::Error::Transport) or
/// [`Error::Io`](crate::Error::Io); the queue reconnects only for
/// those.
///
/// [`next_identifier_watermark`]: MailClient::next_identifier_watermark
pub trait MailClient {
    /// State held while the connection is in IDLE.
    type WaitHandle: Send;

    /// Whether a folder is currently selected.
    fn is_folder_selected(&self) -> bool;

    /// Smallest identifier the server has not assigned yet.
    fn next_identifier_watermark(&mut self) -> impl Future<Output = Result<Identifier>> + Send;

    /// Every identifier `>= watermark`, ascending.
    ///
    /// The result may contain identifiers below `watermark`; the
    /// queue filters them.
    fn search_from(
        &mut self,
        watermark: Identifier,
    ) -> impl Future<Output = Result<Vec<Identifier>>> + Send;

    /// Every identifier in the selected folder, ascending.
    fn list_all_identifiers(&mut self) -> impl Future<Output = Result<Vec<Identifier>>> + Send;

    /// Enter IDLE mode.
    fn enter_wait_mode(&mut self) -> impl Future<Output = Result<Self::WaitHandle>> + Send;

    /// Block until the server reports a change or `timeout` elapses.
    fn wait_for_update(
        &mut self,
        handle: &mut Self::WaitHandle,
        timeout: Duration,
    ) -> impl Future<Output = Result<WaitOutcome>> + Send;

    /// Leave IDLE mode. Called after every successful
    /// [`enter_wait_mode`](MailClient::enter_wait_mode), whatever the
    /// wait returned.
    fn exit_wait_mode(&mut self, handle: Self::WaitHandle) -> impl Future<Output = Result<()>> + Send;

    /// Re-establish the connection and re-select the folder.
    fn reconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Cheap round trip that fails when the connection is dead.
    fn probe(&mut self) -> impl Future<Output = Result<()>> + Send;
}

impl<C: MailClient + Send + ?Sized> MailClient for &mut C {
    type WaitHandle = C::WaitHandle;

    fn is_folder_selected(&self) -> bool {
        (**self).is_folder_selected()
    }

    fn next_identifier_watermark(&mut self) -> impl Future<Output = Result<Identifier>> + Send {
        (**self).next_identifier_watermark()
    }

    fn search_from(
        &mut self,
        watermark: Identifier,
    ) -> impl Future<Output = Result<Vec<Identifier>>> + Send {
        (**self).search_from(watermark)
    }

    fn list_all_identifiers(&mut self) -> impl Future<Output = Result<Vec<Identifier>>> + Send {
        (**self).list_all_identifiers()
    }

    fn enter_wait_mode(&mut self) -> impl Future<Output = Result<Self::WaitHandle>> + Send {
        (**self).enter_wait_mode()
    }

    fn wait_for_update(
        &mut self,
        handle: &mut Self::WaitHandle,
        timeout: Duration,
    ) -> impl Future<Output = Result<WaitOutcome>> + Send {
        (**self).wait_for_update(handle, timeout)
    }

    fn exit_wait_mode(&mut self, handle: Self::WaitHandle) -> impl Future<Output = Result<()>> + Send {
        (**self).exit_wait_mode(handle)
    }

    fn reconnect(&mut self) -> impl Future<Output = Result<()>> + Send {
        (**self).reconnect()
    }

    fn probe(&mut self) -> impl Future<Output = Result<()>> + Send {
        (**self).probe()
    }
}
