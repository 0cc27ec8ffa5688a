use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::types::{CanonicalIdentity, MetricDescriptor};

/// Memoizes one descriptor per distinct canonical identity.
///
/// Entries are created on first sight and kept for the life of the process, so
/// a family keeps the same descriptor across every scrape that produces it.
pub struct DescriptorCache {
    descriptors: RwLock<HashMap<CanonicalIdentity, Arc<MetricDescriptor>>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached descriptor for `identity`, creating it with `help`
    /// when this is the first sighting. Help text of later sightings is ignored.
    pub fn get_or_create(
        &self,
        identity: &CanonicalIdentity,
        help: &str,
    ) -> Arc<MetricDescriptor> {
        if let Some(existing) = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
        {
            return Arc::clone(existing);
        }

        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // another writer may have inserted between the two locks
        Arc::clone(
            descriptors
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(MetricDescriptor::from_identity(identity, help))),
        )
    }

    pub fn get(&self, identity: &CanonicalIdentity) -> Option<Arc<MetricDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached descriptors, sorted by name and then label keys.
    pub fn descriptors(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut descriptors = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect::<Vec<_>>();
        descriptors.sort_by(|left, right| {
            left.name
                .cmp(&right.name)
                .then_with(|| left.variable_labels.cmp(&right.variable_labels))
        });
        descriptors
    }
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new()
    }
}
