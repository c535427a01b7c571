//! Message transport: where CSV attachments come from and where their
//! source messages go afterwards.
//!
//! The orchestrator only sees the [`MessageTransport`] trait. It decides a
//! [`Destination`] for each bundle; the transport owns the mechanics of
//! moving, flagging, or expunging messages.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod client;
pub mod error;
pub mod imap;
pub mod memory;
pub mod parser;

pub use client::{ImapClient, MoveStrategy};
pub use error::TransportError;
pub use imap::ImapTransport;
pub use memory::InMemoryTransport;
pub use parser::BundleParser;

/// One file attached to a source message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// Opaque reference to a source message, used when routing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleHandle {
    pub uid: u32,
}

impl fmt::Display for BundleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{}", self.uid)
    }
}

/// One source message plus its CSV attachments.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub handle: BundleHandle,
    pub external_message_id: Option<String>,
    pub sender_address: Option<String>,
    pub subject_line: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

/// Where a processed message is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    Success,
    Failure,
    Duplicate,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::Success,
        Destination::Failure,
        Destination::Duplicate,
    ];
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Destination::Success => "SUCCESS",
            Destination::Failure => "FAILURE",
            Destination::Duplicate => "DUPLICATE",
        };
        f.write_str(name)
    }
}

/// Source of unprocessed bundles and sink for routing decisions.
#[async_trait]
pub trait MessageTransport: Send {
    /// Opens the connection and makes sure every [`Destination`] exists.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Returns every bundle not yet routed. Fetching does not mark
    /// messages as processed.
    async fn fetch_unprocessed_bundles(&mut self) -> Result<Vec<Bundle>, TransportError>;

    /// Moves a bundle's source message to `destination`. Routing a bundle
    /// that was already routed is a no-op.
    async fn route(
        &mut self,
        handle: BundleHandle,
        destination: Destination,
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
