//! Queue names waiting for an orphan scan.

use dashmap::DashSet;

/// Deduplicated set of queue names awaiting an orphan scan.
#[derive(Debug, Default)]
pub struct PendingScanSet {
    names: DashSet<String>,
}

impl PendingScanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name. Returns `false` if it was already pending.
    pub fn insert(&self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    /// Remove and return every pending name.
    ///
    /// Names inserted while draining are either returned now or kept for
    /// the next drain, never lost.
    pub fn drain(&self) -> Vec<String> {
        let snapshot: Vec<String> = self.names.iter().map(|n| n.key().clone()).collect();

        snapshot
            .into_iter()
            .filter_map(|name| self.names.remove(&name))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_deduplicates() {
        let set = PendingScanSet::new();
        assert!(set.insert("orders"));
        assert!(!set.insert("orders"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_drain_empties_set() {
        let set = PendingScanSet::new();
        set.insert("a");
        set.insert("b");

        let mut drained = set.drain();
        drained.sort();

        assert_eq!(drained, vec!["a".to_string(), "b".to_string()]);
        assert!(set.is_empty());
        assert!(set.drain().is_empty());
    }
}
