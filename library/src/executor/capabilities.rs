//! Local capability detection.

use std::collections::BTreeSet;

/// Answers whether this client can run nodes needing `capability`.
pub trait CapabilityProbe: Send + Sync {
    fn can_run(&self, capability: &str) -> bool;

    /// Required capabilities this client lacks, in request order.
    fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.can_run(c))
            .cloned()
            .collect()
    }
}

/// Fixed capability set, or everything.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    supported: BTreeSet<String>,
    all: bool,
}

impl StaticCapabilities {
    pub fn new(supported: &[&str]) -> Self {
        Self {
            supported: supported.iter().map(|c| c.to_string()).collect(),
            all: false,
        }
    }

    pub fn all() -> Self {
        Self {
            supported: BTreeSet::new(),
            all: true,
        }
    }
}

impl CapabilityProbe for StaticCapabilities {
    fn can_run(&self, capability: &str) -> bool {
        self.all || self.supported.contains(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_in_request_order() {
        let probe = StaticCapabilities::new(&["audio"]);
        let required = vec!["video".to_string(), "audio".to_string(), "midi".to_string()];
        assert_eq!(probe.missing(&required), vec!["video", "midi"]);
        assert!(StaticCapabilities::all().missing(&required).is_empty());
    }
}
