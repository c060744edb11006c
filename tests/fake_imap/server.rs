//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends STARTTLS to upgrade the connection
//!       |
//!   TLS handshake (after this, all traffic is encrypted)
//!       |
//!   Client sends LOGIN with username and password
//!       |
//!   SELECT, then STATUS / SEARCH / IDLE in a loop
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## Command format
//!
//! Every client command starts with a **tag** the client chooses
//! (async-imap uses `A0001`, `A0002`, etc.). The server echoes it in
//! the completion response. Lines prefixed with `*` are **untagged**
//! data sent before the final tagged OK/NO/BAD:
//!
//! ```text
//!   Client:  A0005 UID SEARCH UID 4:*
//!   Server:  * SEARCH 4 5
//!   Server:  A0005 OK SEARCH completed
//! ```
//!
//! ## Test controls
//!
//! Tests mutate the server while a client is connected:
//!
//! - [`FakeImapServer::deliver`] appends a message and wakes every
//!   client that is currently in IDLE.
//! - [`FakeImapServer::drop_connections`] closes every open session,
//!   so clients have to reconnect.
//! - [`FakeImapServer::reject_idle_done`] answers the next DONE lines
//!   with a tagged NO.

use super::handlers::{
    IdleEnd, handle_capability, handle_idle, handle_login, handle_logout, handle_noop,
    handle_search, handle_select, handle_status,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

/// Credentials the fake server accepts.
pub const USERNAME: &str = "testuser";
pub const PASSWORD: &str = "testpass";

/// State shared between the server handle and every connection task.
struct Shared {
    mailbox: Mutex<Mailbox>,
    /// Bumped on every delivery.
    updates: watch::Sender<u64>,
    /// Bumped to close every open connection.
    kill: watch::Sender<u64>,
    /// Number of connections accepted so far.
    connections: AtomicUsize,
    /// DONE lines still to be answered with NO.
    reject_done: AtomicUsize,
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. It speaks enough of the IMAP
/// protocol to drive a `MailQueue` over a real `ImapMailClient`.
pub struct FakeImapServer {
    port: u16,
    shared: Arc<Shared>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state.
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate via `rcgen`.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    IMAP.
    pub async fn start(mailbox: Mailbox) -> Self {
        // Multiple tests may race to install the provider, so we
        // ignore the error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");

        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let shared = Arc::new(Shared {
            mailbox: Mutex::new(mailbox),
            updates: watch::channel(0).0,
            kill: watch::channel(0).0,
            connections: AtomicUsize::new(0),
            reject_done: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &shared).await;
                });
            }
        });

        Self {
            port,
            shared,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Deliver a new message to `folder` and return its UID.
    ///
    /// Clients in IDLE see a `* N EXISTS` notification.
    pub fn deliver(&self, folder: &str) -> u32 {
        let uid = self
            .shared
            .mailbox
            .lock()
            .unwrap()
            .get_folder_mut(folder)
            .expect("deliver to existing folder")
            .deliver();
        self.shared.updates.send_modify(|v| *v += 1);
        uid
    }

    /// Close every open connection. New connections are still
    /// accepted.
    pub fn drop_connections(&self) {
        self.shared.kill.send_modify(|v| *v += 1);
    }

    /// Answer the DONE of the next `times` IDLE commands with
    /// `NO IDLE failed`.
    pub fn reject_idle_done(&self, times: usize) {
        self.shared.reject_done.store(times, Ordering::SeqCst);
    }

    /// Number of connections accepted since the server started.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

/// Handle a single IMAP client connection.
///
/// 1. Send the server greeting (pre-TLS, on the raw TCP stream)
/// 2. Wait for the STARTTLS command and upgrade to TLS
/// 3. Process authenticated commands
async fn handle_connection(stream: tokio::net::TcpStream, acceptor: TlsAcceptor, shared: &Shared) {
    // Subscribed before anything else so a drop_connections() issued
    // from now on reaches this connection.
    let mut kill = shared.kill.subscribe();
    let updates = shared.updates.subscribe();

    let mut reader = BufReader::new(stream);

    // RFC 3501 Section 7.1.1: Server greeting
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }

    let parts: Vec<&str> = line.trim().splitn(2, ' ').collect();
    if parts.len() < 2 {
        return;
    }
    let tag = parts[0];
    let command = parts[1].to_uppercase();

    if command != "STARTTLS" {
        let resp = format!("{tag} BAD Expected STARTTLS\r\n");
        let _ = write_line(&mut reader, &resp).await;
        return;
    }

    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    if write_line(&mut reader, &resp).await.is_err() {
        return;
    }

    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    tokio::select! {
        () = handle_imap_session(tls_stream, shared, updates) => {}
        _ = kill.changed() => {}
    }
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the authenticated IMAP command loop over an established
/// stream.
///
/// Uses `imap-codec`'s `CommandCodec` to parse each client command
/// into a strongly-typed `Command`, then dispatches on the
/// `CommandBody` variant. Handlers get a snapshot of the mailbox
/// taken under lock, except IDLE which has to see later deliveries.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    shared: &Shared,
    mut updates: watch::Receiver<u64>,
) {
    let mut reader = BufReader::new(stream);
    let mut selected_folder: Option<String> = None;
    let mut kill = shared.kill.subscribe();
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // IDLE is handled before the codec: it is a two-phase command
        // and its DONE line is read by the handler itself.
        if let Some((tag, cmd)) = trimmed.split_once(' ')
            && cmd.eq_ignore_ascii_case("IDLE")
        {
            let tag = tag.to_string();
            let reject_done = shared
                .reject_done
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let end = handle_idle(
                &tag,
                reject_done,
                &shared.mailbox,
                selected_folder.as_deref(),
                &mut updates,
                &mut kill,
                &mut reader,
            )
            .await;
            if end == IdleEnd::Closed {
                break;
            }
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let snap = shared.mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Capability => {
                handle_capability(tag, &mut reader).await;
            }
            CommandBody::Noop => {
                handle_noop(tag, &snap, selected_folder.as_deref(), &mut reader).await;
            }
            CommandBody::Login { username, password } => {
                let user: &[u8] = username.as_ref();
                let pass: &[u8] = password.declassify().as_ref();
                let accepted = user == USERNAME.as_bytes() && pass == PASSWORD.as_bytes();
                if !handle_login(tag, accepted, &mut reader).await {
                    break;
                }
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Status { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                handle_status(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Search { criteria, uid, .. } => {
                handle_search(
                    tag,
                    criteria.as_ref(),
                    uid,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
