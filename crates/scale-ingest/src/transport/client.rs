//! IMAP client for the ingestion mailbox.

use async_imap::Session;
use async_native_tls::TlsConnector;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::ImapConfig;

use super::error::{Result, TransportError};

type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// How a message leaves the selected folder, chosen from the server's
/// advertised capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveStrategy {
    /// `UID MOVE` (RFC 6851).
    Move,
    /// Copy, flag, then `UID EXPUNGE` of just that UID (UIDPLUS).
    UidExpunge,
    /// Copy, flag, then a folder-wide `EXPUNGE`. Also removes messages
    /// other clients flagged \Deleted.
    #[default]
    Expunge,
}

impl MoveStrategy {
    pub fn from_capabilities(has_move: bool, has_uidplus: bool) -> Self {
        if has_move {
            MoveStrategy::Move
        } else if has_uidplus {
            MoveStrategy::UidExpunge
        } else {
            MoveStrategy::Expunge
        }
    }
}

/// Thin wrapper over an authenticated IMAP session.
///
/// Unlike a read-only scanner, this client SELECTs its folder so that
/// messages can be flagged and moved once they have been ingested.
pub struct ImapClient {
    session: Option<Session<TlsStream>>,
    config: ImapConfig,
    current_folder: Option<String>,
    move_strategy: MoveStrategy,
}

impl ImapClient {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            session: None,
            config,
            current_folder: None,
            move_strategy: MoveStrategy::default(),
        }
    }

    /// Connects to the IMAP server and logs in.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        if !self.config.use_tls {
            return Err(TransportError::ConfigError(
                "TLS is required for the ingestion mailbox".to_string(),
            ));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to IMAP server at {}", addr);

        let std_stream = std::net::TcpStream::connect(&addr)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let tls = TlsConnector::new();
        let tls_stream = tls.connect(&self.config.host, tcp_stream).await?;

        let client = async_imap::Client::new(tls_stream);
        let password = self.password()?;
        let mut session = client
            .login(&self.config.username, password.expose_secret())
            .await
            .map_err(|(e, _)| TransportError::AuthenticationFailed(e.to_string()))?;

        info!("Authenticated to IMAP server as {}", self.config.username);
        self.move_strategy = match session.capabilities().await {
            Ok(caps) => {
                MoveStrategy::from_capabilities(caps.has_str("MOVE"), caps.has_str("UIDPLUS"))
            }
            Err(e) => {
                warn!("Could not read server capabilities, using plain EXPUNGE: {}", e);
                MoveStrategy::Expunge
            }
        };
        debug!("Message move strategy: {:?}", self.move_strategy);
        self.session = Some(session);
        Ok(())
    }

    pub fn move_strategy(&self) -> MoveStrategy {
        self.move_strategy
    }

    fn password(&self) -> Result<SecretString> {
        if self.config.password.is_some() {
            warn!(
                "Using a direct IMAP password from the config file is not recommended. \
                 Consider password_env_var or password_file instead."
            );
        }
        Ok(crate::secrets::resolve_secret(
            self.config.password.as_deref(),
            self.config.password_file.as_deref(),
            self.config.password_env_var.as_deref(),
        )?)
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Creates any of `folders` that the server does not list yet.
    pub async fn ensure_folders(&mut self, folders: &[&str]) -> Result<()> {
        let session = self.session()?;

        let listed: Vec<_> = session.list(Some(""), Some("*")).await?.collect().await;
        let existing: Vec<String> = listed
            .into_iter()
            .filter_map(|name| name.ok())
            .map(|name| name.name().to_string())
            .collect();

        for &folder in folders {
            if existing.iter().any(|name| name == folder) {
                continue;
            }
            session.create(folder).await.map_err(|e| {
                TransportError::ProtocolError(format!("Failed to create folder '{}': {}", folder, e))
            })?;
            info!("Created IMAP folder: {}", folder);
        }
        Ok(())
    }

    /// Selects `folder` read-write. Returns the number of messages in it.
    pub async fn select_folder(&mut self, folder: &str) -> Result<u32> {
        let session = self.session()?;

        let mailbox = session.select(folder).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("doesn't exist") || message.contains("NO") {
                TransportError::FolderNotFound(folder.to_string())
            } else {
                TransportError::ProtocolError(message)
            }
        })?;

        debug!("Selected folder '{}' ({} messages)", folder, mailbox.exists);
        self.current_folder = Some(folder.to_string());
        Ok(mailbox.exists)
    }

    pub fn current_folder(&self) -> Option<&str> {
        self.current_folder.as_deref()
    }

    /// Returns the UIDs of unseen messages in the selected folder, ascending.
    pub async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        let session = self.session()?;

        let uids = session.uid_search("UNSEEN").await?;
        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();

        debug!("Found {} unseen messages", uid_list.len());
        Ok(uid_list)
    }

    /// Fetches whole messages with BODY.PEEK[] so they stay unseen.
    pub async fn fetch_emails_peek(&mut self, uids: &[u32]) -> Result<Vec<(u32, Vec<u8>)>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.session()?;
        let uid_set = uid_set(uids);
        debug!("Fetching {} messages with UIDs: {}", uids.len(), uid_set);

        let mut messages = session.uid_fetch(&uid_set, "(UID BODY.PEEK[])").await?;

        let mut results = Vec::new();
        while let Some(message_result) = messages.next().await {
            match message_result {
                Ok(message) => {
                    if let (Some(uid), Some(body)) = (message.uid, message.body()) {
                        results.push((uid, body.to_vec()));
                    } else {
                        warn!("Message missing UID or body");
                    }
                }
                Err(e) => {
                    warn!("Error fetching message: {}", e);
                }
            }
        }

        debug!("Fetched {} messages", results.len());
        Ok(results)
    }

    /// Moves a message out of the selected folder. Uses `UID MOVE` when
    /// the server supports it, otherwise copy, flag deleted and expunge
    /// (scoped to the UID under UIDPLUS). A UID that is no longer present
    /// moves nothing.
    pub async fn move_message(&mut self, uid: u32, destination: &str) -> Result<()> {
        let strategy = self.move_strategy;
        let session = self.session()?;
        let uid = uid.to_string();

        match strategy {
            MoveStrategy::Move => session.uid_mv(&uid, destination).await?,
            MoveStrategy::UidExpunge | MoveStrategy::Expunge => {
                session.uid_copy(&uid, destination).await?;
                session
                    .uid_store(&uid, "+FLAGS (\\Deleted)")
                    .await?
                    .collect::<Vec<_>>()
                    .await;
                if strategy == MoveStrategy::UidExpunge {
                    session.uid_expunge(&uid).await?.collect::<Vec<_>>().await;
                } else {
                    session.expunge().await?.collect::<Vec<_>>().await;
                }
            }
        }

        info!("Moved message {} to {}", uid, destination);
        Ok(())
    }

    /// Flags a message as seen without moving it.
    pub async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let session = self.session()?;
        session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await?
            .collect::<Vec<_>>()
            .await;
        debug!("Marked message {} as seen", uid);
        Ok(())
    }

    /// Logs out. Safe to call when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.current_folder = None;
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server");
            session.logout().await?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapClient dropped without explicit disconnect - session will be closed");
        }
    }
}

/// Builds an IMAP UID set such as `1,2,5,10`.
fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
