//! FIFO queue of message identifiers
//!
//! [`MailQueue`] buffers identifiers fetched from a [`MailClient`] and
//! hands them out one at a time. When the buffer runs dry it fetches
//! again, and when the folder has nothing new it parks the connection
//! in IDLE until the server reports a change.
//!
//! # Watermark
//!
//! The queue remembers the smallest identifier it has not seen yet.
//! A fetch reads the server's next identifier (`high`) first, then
//! searches from the watermark and keeps only `[watermark, high)`.
//! Anything delivered between those two round trips is at or above
//! `high`, so it is dropped from this fetch and picked up by the next
//! one. A message is therefore seen by exactly one fetch.

use crate::capability::MailClient;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use futures::Stream;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pull-based queue over a mailbox folder.
///
/// The queue owns no connection state of its own: pass an owned client
/// or `&mut` to one. It never logs out or closes the client.
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> imap_queue::Result<()> {
/// use imap_queue::{ImapConfig, ImapMailClient, MailQueue};
///
/// let mut client = ImapMailClient::connect(ImapConfig::from_env()?).await?;
/// let mut queue = MailQueue::builder()
///     .client(&mut client)
///     .skip_initial(true)
///     .build()
///     .await?;
///
/// loop {
///     let uid = queue.dequeue_message().await?;
///     println!("new message {uid}");
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct MailQueue<C> {
    client: C,
    buffer: Vec<Identifier>,
    cursor: usize,
    watermark: Option<Identifier>,
    config: QueueConfig,
    /// Reconnect attempts spent since the connection last proved
    /// healthy. Shared by every recovery within one operation, so
    /// `max_retry` and `sleep_on_retry` hold across repeated failures.
    retries: u32,
    /// The NOOP shortcut in `ensure_connection` was already taken.
    probed: bool,
}

/// Builder for [`MailQueue`].
#[derive(Debug)]
pub struct MailQueueBuilder<C> {
    client: Option<C>,
    config: QueueConfig,
}

impl<C: MailClient> MailQueueBuilder<C> {
    /// Client the queue will drive. Required.
    #[must_use]
    pub fn client(mut self, client: C) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace all settings at once.
    #[must_use]
    pub const fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn skip_initial(mut self, skip: bool) -> Self {
        self.config.skip_initial = skip;
        self
    }

    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn sleep_on_retry(mut self, sleep: Duration) -> Self {
        self.config.sleep_on_retry = sleep;
        self
    }

    #[must_use]
    pub const fn max_retry(mut self, max: u32) -> Self {
        self.config.max_retry = Some(max);
        self
    }

    /// Resume from a watermark saved by an earlier queue.
    #[must_use]
    pub const fn initial_watermark(mut self, watermark: Identifier) -> Self {
        self.config.initial_watermark = Some(watermark);
        self
    }

    /// Build the queue.
    ///
    /// With `skip_initial` this talks to the server to move the
    /// watermark past every message that already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no client was given or the settings
    /// are invalid, and any fetch error raised while skipping the
    /// initial messages.
    pub async fn build(self) -> Result<MailQueue<C>> {
        let client = self
            .client
            .ok_or_else(|| Error::Config("No mail client supplied".into()))?;
        self.config.validate()?;

        let mut queue = MailQueue {
            client,
            buffer: Vec::new(),
            cursor: 0,
            watermark: self.config.initial_watermark,
            config: self.config,
            retries: 0,
            probed: false,
        };

        if queue.config.skip_initial {
            queue.skip_existing().await?;
        }

        Ok(queue)
    }
}

impl<C: MailClient> MailQueue<C> {
    #[must_use]
    pub fn builder() -> MailQueueBuilder<C> {
        MailQueueBuilder {
            client: None,
            config: QueueConfig::default(),
        }
    }

    /// Build a queue from a client and a full config.
    ///
    /// # Errors
    ///
    /// Same as [`MailQueueBuilder::build`].
    pub async fn new(client: C, config: QueueConfig) -> Result<Self> {
        Self::builder().client(client).config(config).build().await
    }

    /// No identifiers are buffered. Never touches the server.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cursor == self.buffer.len()
    }

    /// Number of buffered identifiers not yet dequeued.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Next identifier, without consuming it or fetching.
    #[must_use]
    pub fn peek_message(&self) -> Option<Identifier> {
        self.buffer.get(self.cursor).copied()
    }

    /// All buffered identifiers, without consuming them or fetching.
    #[must_use]
    pub fn peek_messages(&self) -> &[Identifier] {
        &self.buffer[self.cursor..]
    }

    /// Smallest identifier not yet seen, if any fetch has run.
    ///
    /// Feed this back through
    /// [`MailQueueBuilder::initial_watermark`] to resume after a
    /// restart. Buffered but undelivered identifiers are below the
    /// watermark, so save it only once the buffer is drained.
    #[must_use]
    pub const fn watermark(&self) -> Option<Identifier> {
        self.watermark
    }

    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Give the client back, dropping anything still buffered.
    pub fn into_client(self) -> C {
        self.client
    }

    /// Take the next identifier, waiting for one if necessary.
    ///
    /// # Errors
    ///
    /// Fails when fetching or waiting fails; see
    /// [`ensure_messages`](Self::ensure_messages).
    pub async fn dequeue_message(&mut self) -> Result<Identifier> {
        self.ensure_messages().await?;
        let id = self.buffer[self.cursor];
        self.cursor += 1;
        Ok(id)
    }

    /// Take every buffered identifier, waiting for at least one.
    ///
    /// The returned batch is never empty.
    ///
    /// # Errors
    ///
    /// Fails when fetching or waiting fails; see
    /// [`ensure_messages`](Self::ensure_messages).
    pub async fn dequeue_messages(&mut self) -> Result<Vec<Identifier>> {
        self.ensure_messages().await?;
        let batch = self.buffer[self.cursor..].to_vec();
        self.cursor = self.buffer.len();
        Ok(batch)
    }

    /// Wait until at least one identifier is buffered.
    ///
    /// Alternates between fetching and one bounded IDLE wait until a
    /// fetch turns something up. There is no iteration limit.
    ///
    /// # Errors
    ///
    /// Returns the first error from a fetch or from the IDLE wait that
    /// recovery could not absorb.
    pub async fn ensure_messages(&mut self) -> Result<()> {
        self.reset_retries();
        while self.is_empty() {
            self.fetch_messages().await?;
            if self.is_empty() {
                self.attempt_idle().await?;
            }
        }
        Ok(())
    }

    /// Fetch new identifiers without waiting in IDLE.
    ///
    /// Calling this never loses an identifier: anything buffered but
    /// not yet dequeued is kept, in order, ahead of the newly fetched
    /// ones. Those identifiers are already below the watermark, so no
    /// later fetch would return them again.
    ///
    /// Transport failures reconnect and retry the fetch, sharing one
    /// `max_retry` budget and sleeping `sleep_on_retry` before every
    /// attempt after the first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSelected`] if no folder is selected,
    /// reconnect errors if the connection cannot be restored, and any
    /// non-transport error from the client.
    pub async fn update_messages(&mut self) -> Result<()> {
        self.reset_retries();
        self.fetch_messages().await
    }

    /// Stream of identifiers in delivery order.
    ///
    /// The stream ends after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Identifier>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut queue = state?;
            match queue.dequeue_message().await {
                Ok(id) => Some((Ok(id), Some(queue))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    // -- private helpers --

    async fn skip_existing(&mut self) -> Result<()> {
        let high = loop {
            match self.client.next_identifier_watermark().await {
                Err(e) if e.is_transport() => {
                    warn!("Reading watermark failed, reconnecting: {e}");
                    self.ensure_connection().await?;
                }
                other => break other?,
            }
        };
        self.watermark = Some(high);

        // Twice: the second pass catches anything that landed while
        // the first was in flight.
        for _ in 0..2 {
            self.fetch_messages().await?;
            let skipped = self.len();
            self.cursor = self.buffer.len();
            debug!(skipped, "Skipped initial messages");
        }

        info!(watermark = ?self.watermark, "Skipped existing messages");
        Ok(())
    }

    async fn fetch_messages(&mut self) -> Result<()> {
        loop {
            match self.try_fetch().await {
                Err(e) if e.is_transport() => {
                    warn!("Fetch failed, reconnecting: {e}");
                    self.ensure_connection().await?;
                }
                other => return other,
            }
        }
    }

    async fn try_fetch(&mut self) -> Result<()> {
        if !self.client.is_folder_selected() {
            return Err(Error::NotSelected);
        }

        // Must be read before searching, see the module docs.
        let high = self.client.next_identifier_watermark().await?;

        let (low, found) = match self.watermark {
            Some(watermark) => (watermark, self.client.search_from(watermark).await?),
            None => (1, self.client.list_all_identifiers().await?),
        };

        let mut fresh: Vec<Identifier> = found
            .into_iter()
            .filter(|id| (low..high).contains(id))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();

        debug!(low, high, found = fresh.len(), "Fetched identifiers");

        let first_fetch = self.watermark.is_none();
        if first_fetch || !fresh.is_empty() {
            self.watermark = Some(high.max(low));
        }

        self.buffer.drain(..self.cursor);
        self.buffer.extend(fresh);
        self.cursor = 0;
        Ok(())
    }

    async fn attempt_idle(&mut self) -> Result<()> {
        match self.idle_once().await {
            Err(e) if e.is_transport() => {
                warn!("IDLE failed, reconnecting: {e}");
                self.ensure_connection()
                    .await
                    .map_err(|e| Error::Disconnected(Box::new(e)))
            }
            other => other,
        }
    }

    const fn reset_retries(&mut self) {
        self.retries = 0;
        self.probed = false;
    }

    async fn idle_once(&mut self) -> Result<()> {
        let mut handle = self.client.enter_wait_mode().await?;
        let waited = self
            .client
            .wait_for_update(&mut handle, self.config.idle_timeout)
            .await;
        let exited = self.client.exit_wait_mode(handle).await;

        match (waited, exited) {
            (Ok(outcome), Ok(())) => {
                debug!(?outcome, "IDLE finished");
                // A full IDLE round trip: the connection is healthy.
                self.reset_retries();
                Ok(())
            }
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(wait), Err(exit)) => {
                if exit.is_transport() && !wait.is_transport() {
                    Err(exit)
                } else {
                    Err(wait)
                }
            }
        }
    }

    /// Make sure the folder is selected, reconnecting if needed.
    ///
    /// Attempts are counted in `self.retries` and only reset once the
    /// connection has done useful work again, so a server that accepts
    /// the reconnect and then fails every command still runs into
    /// `max_retry`, with `sleep_on_retry` between attempts.
    async fn ensure_connection(&mut self) -> Result<()> {
        if !self.probed && self.client.is_folder_selected() {
            // Once per operation: a connection that answers NOOP after
            // a transport error gets one more try without reconnecting.
            self.probed = true;
            if self.client.probe().await.is_ok() {
                return Ok(());
            }
        }

        loop {
            let attempts = self.retries;
            if self.config.max_retry.is_some_and(|max| attempts >= max) {
                return Err(Error::RetryExhausted { attempts });
            }
            if attempts > 0 {
                tokio::time::sleep(self.config.sleep_on_retry).await;
            }
            self.retries += 1;
            let attempts = self.retries;

            match self.client.reconnect().await {
                Ok(()) if self.client.is_folder_selected() => {
                    info!(attempts, "Reconnected");
                    return Ok(());
                }
                Ok(()) => warn!(attempts, "Reconnected but no folder is selected"),
                Err(e) => warn!(attempts, "Reconnect failed: {e}"),
            }
        }
    }
}
