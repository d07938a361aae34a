//! Manager-side cache of what each client reports about itself.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::deploy::reconciler::DeployedRecord;
use crate::protocol::{StatusEvent, StatusKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorStatus {
    pub running: bool,
    /// Deploy id the client says it is hosting.
    pub current_id: Option<String>,
    pub last_error: Option<String>,
    /// Stopped by its watchdog; only a user edit or a redeploy resumes it.
    pub watchdog_tripped: bool,
    pub last_seen_ms: u64,
}

impl ExecutorStatus {
    pub fn apply(&mut self, event: &StatusEvent, now_ms: u64) {
        self.last_seen_ms = now_ms;
        let names_current = event.loop_id.is_none() || event.loop_id == self.current_id;
        match event.event {
            StatusKind::Deployed | StatusKind::Started => {
                self.running = true;
                self.current_id = event.loop_id.clone();
                self.last_error = None;
                self.watchdog_tripped = false;
            }
            StatusKind::Stopped if names_current => {
                self.running = false;
                self.watchdog_tripped |= event.is_watchdog_stop();
            }
            StatusKind::Removed if names_current => {
                self.running = false;
                self.current_id = None;
            }
            StatusKind::Stopped | StatusKind::Removed => {}
            StatusKind::Rejected | StatusKind::Error => {
                self.last_error = Some(
                    event
                        .diagnostic("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("unspecified")
                        .to_string(),
                );
            }
        }
    }

    /// True when the client reports `id` as loaded.
    pub fn hosts(&self, id: &str) -> bool {
        self.current_id.as_deref() == Some(id)
    }

    /// The client has reported after `record` was deployed and is not
    /// hosting `desired_id`. A report from the deploy's own millisecond may
    /// predate it, so it does not count. A client that rejected the deploy
    /// is left alone.
    pub fn drifted_from(&self, record: &DeployedRecord, desired_id: &str) -> bool {
        self.last_seen_ms > record.deployed_at_ms
            && !self.hosts(desired_id)
            && self.last_error.is_none()
    }

    /// Loaded but stopped by a command, not by its watchdog.
    pub fn needs_restart(&self, id: &str) -> bool {
        !self.running && self.hosts(id) && !self.watchdog_tripped
    }
}

pub type StatusTable = BTreeMap<String, ExecutorStatus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_lifecycle() {
        let mut status = ExecutorStatus::default();
        status.apply(&StatusEvent::new(StatusKind::Deployed, Some("p1")), 10);
        assert!(status.running && status.hosts("p1"));
        status.apply(&StatusEvent::new(StatusKind::Stopped, Some("p1")), 20);
        assert!(status.needs_restart("p1"));
        status.apply(
            &StatusEvent::new(StatusKind::Rejected, Some("p2")).with("reason", "too big"),
            30,
        );
        assert_eq!(status.last_error.as_deref(), Some("too big"));
        assert!(status.hosts("p1"));
        status.apply(&StatusEvent::new(StatusKind::Removed, Some("p1")), 40);
        assert_eq!(status.current_id, None);
        assert_eq!(status.last_seen_ms, 40);
    }

    #[test]
    fn watchdog_stop_is_not_restarted() {
        let mut status = ExecutorStatus::default();
        status.apply(&StatusEvent::new(StatusKind::Started, Some("p1")), 10);
        status.apply(
            &StatusEvent::new(StatusKind::Stopped, Some("p1")).with("watchdog", "slow-tick"),
            20,
        );
        assert!(status.watchdog_tripped);
        assert!(!status.needs_restart("p1"));
    }

    #[test]
    fn same_millisecond_report_is_not_drift() {
        let record = DeployedRecord {
            patch_id: "p2".to_string(),
            roots: Default::default(),
            node_ids: Default::default(),
            signature: String::new(),
            deployed_at_ms: 100,
            baked: Default::default(),
            bypassed: Default::default(),
        };
        let mut status = ExecutorStatus::default();
        status.apply(&StatusEvent::new(StatusKind::Removed, Some("p1")), 100);
        assert!(!status.drifted_from(&record, "p2"));

        status.apply(&StatusEvent::new(StatusKind::Removed, Some("p1")), 101);
        assert!(status.drifted_from(&record, "p2"));
    }

    #[test]
    fn events_for_other_ids_are_ignored() {
        let mut status = ExecutorStatus::default();
        status.apply(&StatusEvent::new(StatusKind::Started, Some("new")), 10);
        status.apply(&StatusEvent::new(StatusKind::Removed, Some("old")), 11);
        assert!(status.running && status.hosts("new"));
    }
}
