//! Message parsing and CSV attachment extraction.

use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use log::debug;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};

use crate::config::ImapConfig;
use crate::sanitize::file_name_only;

use super::error::{Result, TransportError};
use super::{Attachment, Bundle, BundleHandle};

const CASE_INSENSITIVE: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Turns raw RFC 822 messages into [`Bundle`]s holding only the
/// attachments that pass the filename and size filters.
pub struct BundleParser {
    min_size: u64,
    max_size: u64,
    filename_include_patterns: Vec<Pattern>,
    filename_exclude_patterns: Vec<Pattern>,
}

impl BundleParser {
    /// Builds a parser from the mailbox config. Patterns that fail to
    /// compile are skipped; config validation rejects them earlier.
    pub fn new(config: &ImapConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Pattern> {
            patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect()
        };

        Self {
            min_size: config.min_attachment_size,
            max_size: config.max_attachment_size,
            filename_include_patterns: compile(&config.filename_include),
            filename_exclude_patterns: compile(&config.filename_exclude),
        }
    }

    pub fn parse(&self, uid: u32, raw_message: &[u8]) -> Result<Bundle> {
        let message = MessageParser::default()
            .parse(raw_message)
            .ok_or_else(|| TransportError::ParseError(format!("Message {} is not valid MIME", uid)))?;

        let mut bundle = Bundle {
            handle: BundleHandle { uid },
            external_message_id: message.message_id().map(|s| s.to_string()),
            sender_address: sender_address(&message),
            subject_line: message.subject().map(|s| s.to_string()),
            received_at: received_at(&message),
            attachments: Vec::new(),
        };

        for part in message.parts.iter() {
            if !is_attachment(part) {
                continue;
            }

            let content = match &part.body {
                PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
                PartType::Text(text) => text.as_bytes().to_vec(),
                _ => continue,
            };

            let Some(file_name) = attachment_filename(part) else {
                debug!("Unnamed attachment in message {} skipped", uid);
                continue;
            };

            if !self.passes_filters(&file_name, content.len()) {
                debug!("Attachment '{}' filtered out", file_name);
                continue;
            }

            debug!("Found attachment: {} ({} bytes)", file_name, content.len());
            bundle.attachments.push(Attachment { file_name, content });
        }

        debug!(
            "Extracted {} attachments from message {}",
            bundle.attachments.len(),
            uid
        );
        Ok(bundle)
    }

    fn passes_filters(&self, file_name: &str, size: usize) -> bool {
        let size = size as u64;
        if size < self.min_size {
            debug!("Attachment '{}' too small: {} < {}", file_name, size, self.min_size);
            return false;
        }
        if size > self.max_size {
            debug!("Attachment '{}' too large: {} > {}", file_name, size, self.max_size);
            return false;
        }
        self.passes_filename_filter(file_name)
    }

    fn passes_filename_filter(&self, file_name: &str) -> bool {
        if self
            .filename_exclude_patterns
            .iter()
            .any(|p| p.matches_with(file_name, CASE_INSENSITIVE))
        {
            return false;
        }

        self.filename_include_patterns.is_empty()
            || self
                .filename_include_patterns
                .iter()
                .any(|p| p.matches_with(file_name, CASE_INSENSITIVE))
    }
}

/// A part counts as an attachment when its disposition says so or it
/// carries a file name.
fn is_attachment(part: &MessagePart) -> bool {
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype().eq_ignore_ascii_case("attachment") {
            return true;
        }
    }
    part.attachment_name().is_some()
}

fn attachment_filename(part: &MessagePart) -> Option<String> {
    part.attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .map(file_name_only)
        .filter(|name| name != "attachment")
}

fn sender_address(message: &Message) -> Option<String> {
    message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|addr| addr.address())
        .map(|addr| addr.to_string())
}

fn received_at(message: &Message) -> Option<DateTime<Utc>> {
    message
        .date()
        .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0))
}
