//! Outbound collaborators of the executor: status telemetry and external
//! resource release.

use std::sync::Mutex;

use log::warn;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::StatusEvent;

/// Telemetry channel for status events. Fire-and-forget.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

#[derive(Debug, Default)]
pub struct RecordingStatus {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn take(&self) -> Vec<StatusEvent> {
        match self.events.lock() {
            Ok(mut e) => std::mem::take(&mut *e),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl StatusSink for RecordingStatus {
    fn emit(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Tags events with the client id and forwards them to the manager.
pub struct ChannelStatus {
    client_id: String,
    tx: UnboundedSender<(String, StatusEvent)>,
}

impl ChannelStatus {
    pub fn new(client_id: &str, tx: UnboundedSender<(String, StatusEvent)>) -> Self {
        Self {
            client_id: client_id.to_string(),
            tx,
        }
    }
}

impl StatusSink for ChannelStatus {
    fn emit(&self, event: StatusEvent) {
        if self.tx.send((self.client_id.clone(), event)).is_err() {
            warn!("Status channel closed, {} event dropped", self.client_id);
        }
    }
}

/// Releases resources held outside the runtime (decoders, device handles)
/// for a node that is going away.
pub trait ResourceReleaser: Send + Sync {
    fn release(&self, node_id: &str);
}

#[derive(Debug, Default)]
pub struct NoopReleaser;

impl ResourceReleaser for NoopReleaser {
    fn release(&self, _node_id: &str) {}
}
