//! [`MessageTransport`] backed by an IMAP mailbox.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::sanitize::redact_email;

use super::client::ImapClient;
use super::error::TransportError;
use super::parser::BundleParser;
use super::{Bundle, BundleHandle, Destination, MessageTransport};

/// Reads unseen messages from the inbox and moves them into the
/// processed, failed, or duplicate folder once the orchestrator has
/// decided their fate.
pub struct ImapTransport {
    client: ImapClient,
    parser: BundleParser,
    config: ImapConfig,
}

impl ImapTransport {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            client: ImapClient::new(config.clone()),
            parser: BundleParser::new(&config),
            config,
        }
    }

    pub fn folder_for(&self, destination: Destination) -> &str {
        match destination {
            Destination::Success => &self.config.processed_folder,
            Destination::Failure => &self.config.failed_folder,
            Destination::Duplicate => &self.config.duplicate_folder,
        }
    }

    async fn select_inbox(&mut self) -> Result<(), TransportError> {
        if self.client.current_folder() != Some(self.config.inbox.as_str()) {
            let inbox = self.config.inbox.clone();
            self.client.select_folder(&inbox).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for ImapTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.client.connect().await?;

        let folders: Vec<String> = Destination::ALL
            .iter()
            .map(|d| self.folder_for(*d).to_string())
            .collect();
        let folder_refs: Vec<&str> = folders.iter().map(String::as_str).collect();
        self.client.ensure_folders(&folder_refs).await?;

        self.select_inbox().await
    }

    async fn fetch_unprocessed_bundles(&mut self) -> Result<Vec<Bundle>, TransportError> {
        self.select_inbox().await?;

        let mut uids = self.client.search_unseen().await?;
        let batch_size = self.config.batch_size.max(1) as usize;
        if uids.len() > batch_size {
            debug!(
                "Limiting fetch to {} of {} unseen messages",
                batch_size,
                uids.len()
            );
            uids.truncate(batch_size);
        }

        let raw_messages = self.client.fetch_emails_peek(&uids).await?;
        let mut bundles = Vec::with_capacity(raw_messages.len());

        for (uid, raw) in raw_messages {
            match self.parser.parse(uid, &raw) {
                Ok(bundle) if bundle.attachments.is_empty() => {
                    debug!(
                        uid,
                        sender = %bundle.sender_address.as_deref().map(redact_email).unwrap_or_default(),
                        "Message has no CSV attachments, marking as seen"
                    );
                    self.client.mark_seen(uid).await?;
                }
                Ok(bundle) => bundles.push(bundle),
                Err(e) => {
                    // Surfaced with no attachments so the orchestrator
                    // routes it to the failure folder.
                    warn!(uid, error = %e, "Unparseable message");
                    bundles.push(Bundle {
                        handle: BundleHandle { uid },
                        external_message_id: None,
                        sender_address: None,
                        subject_line: None,
                        received_at: None,
                        attachments: Vec::new(),
                    });
                }
            }
        }

        info!(count = bundles.len(), "Fetched unprocessed bundles");
        Ok(bundles)
    }

    async fn route(
        &mut self,
        handle: BundleHandle,
        destination: Destination,
    ) -> Result<(), TransportError> {
        self.select_inbox().await?;
        let folder = self.folder_for(destination).to_string();
        self.client.move_message(handle.uid, &folder).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client.disconnect().await
    }
}
