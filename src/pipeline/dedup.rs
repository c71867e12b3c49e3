use std::collections::HashSet;

use crate::content::ItemIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Keep,
    Skip,
}

/// Identities known to be stored for one feed, scoped to a single run.
///
/// Advisory: it saves work on the common "nothing new" path, but the store's
/// uniqueness constraint is what actually prevents duplicates.
#[derive(Debug, Default)]
pub struct DeduplicationFilter {
    seen: HashSet<String>,
}

impl DeduplicationFilter {
    pub fn new(existing: HashSet<String>) -> Self {
        Self { seen: existing }
    }

    pub fn check(&self, identity: &ItemIdentity) -> DedupDecision {
        if self.seen.contains(&identity.value) {
            DedupDecision::Skip
        } else {
            DedupDecision::Keep
        }
    }

    /// Records an identity persisted (or found persisted) during this run, so
    /// a repeat later in the same payload is skipped.
    pub fn remember(&mut self, identity: &ItemIdentity) {
        self.seen.insert(identity.value.clone());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::IdentitySource;

    fn identity(value: &str) -> ItemIdentity {
        ItemIdentity {
            value: value.into(),
            source: IdentitySource::Guid,
        }
    }

    #[test]
    fn test_existing_identities_are_skipped() {
        let filter = DeduplicationFilter::new(HashSet::from(["a".to_string()]));
        assert_eq!(filter.check(&identity("a")), DedupDecision::Skip);
        assert_eq!(filter.check(&identity("b")), DedupDecision::Keep);
    }

    #[test]
    fn test_remembered_identities_are_skipped() {
        let mut filter = DeduplicationFilter::default();
        assert!(filter.is_empty());
        filter.remember(&identity("b"));
        assert_eq!(filter.check(&identity("b")), DedupDecision::Skip);
        assert_eq!(filter.len(), 1);
    }
}
