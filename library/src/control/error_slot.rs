//! The single user-visible "last error" slot.

use log::warn;

use crate::error::LibraryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Ambiguous roots or no resolvable targets.
    Resolution,
    /// Per-group export or serialization failure.
    Export,
    LocalOnlyMedia,
    /// A client refused a deploy (validation, capabilities, identity).
    Rejected,
    Watchdog,
    /// A loop operation failed (unknown client, not a root, overlap).
    Loop,
    /// A patch group needs a node some loop owns.
    LoopConflict,
}

impl ErrorClass {
    pub fn of(error: &LibraryError) -> Self {
        match error {
            LibraryError::AmbiguousRoots(_) | LibraryError::NoTargets(_) => ErrorClass::Resolution,
            LibraryError::LocalOnlyMedia(_) => ErrorClass::LocalOnlyMedia,
            LibraryError::Loop(_) => ErrorClass::Loop,
            LibraryError::Capability(_) | LibraryError::Identity { .. } => ErrorClass::Rejected,
            _ => ErrorClass::Export,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployError {
    pub class: ErrorClass,
    pub message: String,
    /// Client the failure came from, when one client caused it.
    pub client: Option<String>,
}

impl DeployError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            client: None,
        }
    }

    pub fn with_client(mut self, client_id: &str) -> Self {
        self.client = Some(client_id.to_string());
        self
    }
}

impl From<LibraryError> for DeployError {
    fn from(error: LibraryError) -> Self {
        Self::new(ErrorClass::of(&error), error.to_string())
    }
}

impl std::fmt::Display for DeployError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Holds the most recent deployment-relevant failure.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    current: Option<DeployError>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, error: DeployError) {
        warn!("{:?}: {}", error.class, error.message);
        self.current = Some(error);
    }

    /// Clears the slot only if it holds an error of `class`.
    pub fn clear(&mut self, class: ErrorClass) -> bool {
        self.clear_where(|e| e.class == class)
    }

    /// Clears the slot only if `class` was raised by `client_id`.
    pub fn clear_for_client(&mut self, class: ErrorClass, client_id: &str) -> bool {
        self.clear_where(|e| e.class == class && e.client.as_deref() == Some(client_id))
    }

    fn clear_where(&mut self, matches: impl FnOnce(&DeployError) -> bool) -> bool {
        if self.current.as_ref().is_some_and(matches) {
            self.current = None;
            return true;
        }
        false
    }

    pub fn current(&self) -> Option<&DeployError> {
        self.current.as_ref()
    }

    pub fn class(&self) -> Option<ErrorClass> {
        self.current.as_ref().map(|e| e.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_only_matching_class() {
        let mut slot = ErrorSlot::new();
        slot.set(LibraryError::AmbiguousRoots(vec!["a".into(), "b".into()]).into());
        assert_eq!(slot.class(), Some(ErrorClass::Resolution));
        assert!(!slot.clear(ErrorClass::Export));
        assert!(slot.current().is_some());
        assert!(slot.clear(ErrorClass::Resolution));
        assert!(slot.current().is_none());
    }

    #[test]
    fn client_scoped_clear_needs_the_same_client() {
        let mut slot = ErrorSlot::new();
        slot.set(DeployError::new(ErrorClass::Rejected, "c1 refused").with_client("c1"));
        assert!(!slot.clear_for_client(ErrorClass::Rejected, "c2"));
        assert!(slot.current().is_some());
        assert!(slot.clear_for_client(ErrorClass::Rejected, "c1"));
        assert!(slot.current().is_none());
    }

    #[test]
    fn newer_error_replaces_older() {
        let mut slot = ErrorSlot::new();
        slot.set(DeployError::new(ErrorClass::Export, "bad group"));
        slot.set(DeployError::new(ErrorClass::Watchdog, "slow"));
        assert!(!slot.clear(ErrorClass::Export));
        assert_eq!(slot.current().map(|e| e.message.as_str()), Some("slow"));
    }
}
