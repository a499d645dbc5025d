//! The set of known behaviours, partitioned by availability.

use mimic_core::{BehaviourCategory, BehaviourId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::behaviour::{Availability, Behaviour, BehaviourDescriptor, Requirements};

struct CatalogEntry {
    descriptor: BehaviourDescriptor,
    behaviour: Arc<dyn Behaviour>,
}

/// Built once at startup. Availability is evaluated here, centrally, from
/// each behaviour's declared requirements.
#[derive(Default)]
pub struct BehaviourCatalog {
    available: BTreeMap<BehaviourId, CatalogEntry>,
    unavailable: BTreeMap<BehaviourId, BehaviourDescriptor>,
}

impl BehaviourCatalog {
    /// Build against the running host.
    pub fn build(behaviours: Vec<Arc<dyn Behaviour>>) -> Self {
        Self::build_with(behaviours, |req| req.check())
    }

    /// Build with a custom availability probe.
    pub fn build_with<F>(behaviours: Vec<Arc<dyn Behaviour>>, probe: F) -> Self
    where
        F: Fn(&Requirements) -> Availability,
    {
        let mut catalog = Self::default();
        for behaviour in behaviours {
            let id = behaviour.id().to_string();
            if catalog.contains(&id) {
                warn!(behaviour = %id, "duplicate behaviour id, keeping the first");
                continue;
            }

            let availability = probe(&behaviour.requirements());
            let descriptor = BehaviourDescriptor::of(behaviour.as_ref(), availability);
            match &descriptor.availability {
                Availability::Available => {
                    catalog
                        .available
                        .insert(id, CatalogEntry { descriptor, behaviour });
                }
                Availability::Unavailable { reason } => {
                    info!(behaviour = %id, reason = %reason, "behaviour unavailable on this host");
                    catalog.unavailable.insert(id, descriptor);
                }
            }
        }
        info!(
            available = catalog.available.len(),
            unavailable = catalog.unavailable.len(),
            "behaviour catalog built"
        );
        catalog
    }

    fn contains(&self, id: &str) -> bool {
        self.available.contains_key(id) || self.unavailable.contains_key(id)
    }

    /// An available behaviour by id.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Behaviour>> {
        self.available.get(id).map(|e| &e.behaviour)
    }

    /// Descriptor of any known behaviour, available or not.
    pub fn descriptor(&self, id: &str) -> Option<&BehaviourDescriptor> {
        self.available
            .get(id)
            .map(|e| &e.descriptor)
            .or_else(|| self.unavailable.get(id))
    }

    /// Available ids of one category, sorted.
    pub fn ids_in(&self, category: BehaviourCategory) -> Vec<BehaviourId> {
        self.available
            .values()
            .filter(|e| e.descriptor.category == category)
            .map(|e| e.descriptor.id.clone())
            .collect()
    }

    pub fn available(&self) -> impl Iterator<Item = &BehaviourDescriptor> {
        self.available.values().map(|e| &e.descriptor)
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &BehaviourDescriptor> {
        self.unavailable.values()
    }

    /// Every descriptor, available ones first.
    pub fn descriptors(&self) -> Vec<BehaviourDescriptor> {
        self.available().chain(self.unavailable()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.available.len() + self.unavailable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
