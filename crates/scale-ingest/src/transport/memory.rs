//! In-process [`MessageTransport`] used by tests and dry runs.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::error::TransportError;
use super::{Attachment, Bundle, BundleHandle, Destination, MessageTransport};

#[derive(Debug, Default)]
struct MemoryState {
    next_uid: u32,
    pending: Vec<Bundle>,
    routed: Vec<(BundleHandle, Destination)>,
    connected: bool,
    unreachable: bool,
    route_failures: bool,
}

/// A mailbox held in memory. Clones share the same state, so a test can
/// keep a handle while a worker owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a message from `sender` carrying `attachments`.
    pub fn deliver(&self, sender: &str, subject: &str, attachments: Vec<Attachment>) -> BundleHandle {
        let mut state = self.state();
        state.next_uid += 1;
        let handle = BundleHandle {
            uid: state.next_uid,
        };
        state.pending.push(Bundle {
            handle,
            external_message_id: Some(format!("<{}@memory.local>", handle.uid)),
            sender_address: Some(sender.to_string()),
            subject_line: Some(subject.to_string()),
            received_at: Some(Utc::now()),
            attachments,
        });
        handle
    }

    /// Makes `connect` and `fetch_unprocessed_bundles` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Makes every `route` call fail.
    pub fn set_route_failures(&self, fail: bool) {
        self.state().route_failures = fail;
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Every routing decision recorded so far, in order.
    pub fn routed(&self) -> Vec<(BundleHandle, Destination)> {
        self.state().routed.clone()
    }

    pub fn destination_of(&self, handle: BundleHandle) -> Option<Destination> {
        self.state()
            .routed
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, d)| *d)
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(TransportError::ConnectionFailed(
                "in-memory mailbox is unreachable".to_string(),
            ));
        }
        state.connected = true;
        Ok(())
    }

    async fn fetch_unprocessed_bundles(&mut self) -> Result<Vec<Bundle>, TransportError> {
        let state = self.state();
        if state.unreachable {
            return Err(TransportError::ConnectionFailed(
                "in-memory mailbox is unreachable".to_string(),
            ));
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state.pending.clone())
    }

    async fn route(
        &mut self,
        handle: BundleHandle,
        destination: Destination,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.route_failures {
            return Err(TransportError::ProtocolError(format!(
                "failed to route {}",
                handle
            )));
        }
        if state.routed.iter().any(|(h, _)| *h == handle) {
            return Ok(());
        }
        state.pending.retain(|bundle| bundle.handle != handle);
        state.routed.push((handle, destination));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.state().connected = false;
        Ok(())
    }
}
