//! Client-addressed message sending.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use log::{trace, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::LibraryError;
use crate::protocol::ControlMessage;

/// Sends one control message to one client. Delivery is fire-and-forget;
/// clients answer with status events on their own channel.
pub trait Transport: Send + Sync {
    fn send(&self, client_id: &str, message: ControlMessage) -> Result<(), LibraryError>;
}

/// Keeps every message in send order instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, ControlMessage)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, ControlMessage)> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Drains the log.
    pub fn take(&self) -> Vec<(String, ControlMessage)> {
        match self.sent.lock() {
            Ok(mut s) => std::mem::take(&mut *s),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// `(client, command name)` pairs, handy for asserting order.
    pub fn names(&self) -> Vec<(String, &'static str)> {
        self.sent()
            .into_iter()
            .map(|(c, m)| (c, m.name()))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, client_id: &str, message: ControlMessage) -> Result<(), LibraryError> {
        trace!("-> {} {}", client_id, message.name());
        let mut sent = self
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sent.push((client_id.to_string(), message));
        Ok(())
    }
}

/// Forwards messages to per-client tokio channels.
#[derive(Default)]
pub struct ChannelTransport {
    senders: RwLock<HashMap<String, UnboundedSender<ControlMessage>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client and returns the receiving end of its channel.
    pub fn connect(&self, client_id: &str) -> UnboundedReceiver<ControlMessage> {
        let (tx, rx) = unbounded_channel();
        self.senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(client_id.to_string(), tx);
        rx
    }

    pub fn disconnect(&self, client_id: &str) {
        self.senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(client_id);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, client_id: &str, message: ControlMessage) -> Result<(), LibraryError> {
        let senders = self
            .senders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = senders.get(client_id) else {
            warn!("No channel for client {}, dropping {}", client_id, message.name());
            return Ok(());
        };
        tx.send(message)
            .map_err(|e| LibraryError::runtime(format!("client {} is gone: {}", client_id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_transport_keeps_order() {
        let transport = RecordingTransport::new();
        transport.send("c1", ControlMessage::stop("p")).unwrap();
        transport.send("c1", ControlMessage::remove("p")).unwrap();
        assert_eq!(
            transport.names(),
            vec![("c1".to_string(), "stop"), ("c1".to_string(), "remove")]
        );
        assert_eq!(transport.take().len(), 2);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn channel_transport_delivers_to_connected_clients() {
        let transport = ChannelTransport::new();
        let mut rx = transport.connect("c1");
        transport.send("c1", ControlMessage::start("p")).unwrap();
        transport.send("nobody", ControlMessage::start("p")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::start("p"));
        drop(rx);
        assert!(transport.send("c1", ControlMessage::start("p")).is_err());
    }
}
