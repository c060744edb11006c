//! IMAP-backed mail client for the queue

use crate::capability::{MailClient, WaitOutcome};
use crate::config::ImapConfig;
use crate::connection::{self, ImapSession, ImapStream};
use crate::error::{Error, Result};
use crate::identifier::{Identifier, IdentifierKind};
use async_imap::extensions::idle::{Handle, IdleResponse};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// [`MailClient`] over a single IMAP connection.
///
/// The connection is dropped as soon as any command fails at the
/// transport level, so [`is_folder_selected`] turns false until
/// [`reconnect`] succeeds.
///
/// The server must support IDLE (RFC 2177).
///
/// [`is_folder_selected`]: MailClient::is_folder_selected
/// [`reconnect`]: MailClient::reconnect
pub struct ImapMailClient {
    config: ImapConfig,
    session: Option<ImapSession>,
}

/// An IMAP session parked in IDLE.
pub struct IdleHandle(Handle<ImapStream>);

impl ImapMailClient {
    /// Connect, log in and select `config.folder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection, STARTTLS, LOGIN or
    /// SELECT fails.
    pub async fn connect(config: ImapConfig) -> Result<Self> {
        let session = connection::open(&config).await?;
        Ok(Self {
            config,
            session: Some(session),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Log out and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if LOGOUT fails.
    pub async fn logout(mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.logout().await?;
        }
        Ok(())
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Transport("not connected".into()))
    }

    /// Forget the session if `result` says the connection is gone.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_transport()
        {
            warn!("Dropping IMAP session: {e}");
            self.session = None;
        }
        result
    }

    async fn search(&mut self, query: &str) -> Result<Vec<Identifier>> {
        let kind = self.config.identifier;
        let session = self.session()?;
        let found: HashSet<u32> = match kind {
            IdentifierKind::Uid => session.uid_search(query).await?,
            IdentifierKind::Sequence => session.search(query).await?,
        };

        let mut ids: Vec<Identifier> = found.into_iter().collect();
        ids.sort_unstable();
        debug!(query, found = ids.len(), "Searched folder");
        Ok(ids)
    }

    async fn status_watermark(&mut self) -> Result<Identifier> {
        let kind = self.config.identifier;
        let folder = self.config.folder.clone();
        let status = self
            .session()?
            .status(&folder, "(UIDNEXT MESSAGES)")
            .await?;

        match kind {
            IdentifierKind::Uid => status
                .uid_next
                .ok_or_else(|| Error::Imap(format!("No UIDNEXT in STATUS for {folder}"))),
            IdentifierKind::Sequence => Ok(status.exists + 1),
        }
    }
}

/// Map a failure that consumed the session.
///
/// Once IDLE owns the session, any error leaves the client without a
/// connection, so even a tagged NO or BAD has to go through reconnect.
fn session_lost(stage: &str, e: async_imap::error::Error) -> Error {
    match Error::from(e) {
        e if e.is_transport() => e,
        e => Error::Transport(format!("{stage}: {e}")),
    }
}

impl MailClient for ImapMailClient {
    type WaitHandle = IdleHandle;

    fn is_folder_selected(&self) -> bool {
        self.session.is_some()
    }

    async fn next_identifier_watermark(&mut self) -> Result<Identifier> {
        let result = self.status_watermark().await;
        self.track(result)
    }

    async fn search_from(&mut self, watermark: Identifier) -> Result<Vec<Identifier>> {
        let query = self.config.identifier.range_from(watermark);
        let result = self.search(&query).await;
        self.track(result)
    }

    async fn list_all_identifiers(&mut self) -> Result<Vec<Identifier>> {
        let result = self.search("ALL").await;
        self.track(result)
    }

    async fn enter_wait_mode(&mut self) -> Result<IdleHandle> {
        let session = self
            .session
            .take()
            .ok_or_else(|| Error::Transport("not connected".into()))?;

        // The session lives inside the handle until `exit_wait_mode`.
        let mut handle = session.idle();
        handle
            .init()
            .await
            .map_err(|e| session_lost("entering IDLE", e))?;
        debug!("Entered IDLE");
        Ok(IdleHandle(handle))
    }

    async fn wait_for_update(
        &mut self,
        handle: &mut IdleHandle,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let (wait, _stop) = handle.0.wait_with_timeout(timeout);
        let outcome = match wait.await? {
            IdleResponse::NewData(_) => WaitOutcome::Updated,
            IdleResponse::Timeout => WaitOutcome::TimedOut,
            IdleResponse::ManualInterrupt => WaitOutcome::Interrupted,
        };
        debug!(?outcome, "IDLE wait returned");
        Ok(outcome)
    }

    async fn exit_wait_mode(&mut self, handle: IdleHandle) -> Result<()> {
        let session = handle
            .0
            .done()
            .await
            .map_err(|e| session_lost("leaving IDLE", e))?;
        self.session = Some(session);
        debug!("Left IDLE");
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.session = None;
        let session = connection::open(&self.config).await?;
        self.session = Some(session);
        info!(folder = %self.config.folder, "Reconnected to IMAP server");
        Ok(())
    }

    async fn probe(&mut self) -> Result<()> {
        let result = match self.session() {
            Ok(session) => session.noop().await.map_err(Error::from),
            Err(e) => Err(e),
        };
        self.track(result)
    }
}
