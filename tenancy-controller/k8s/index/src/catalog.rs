use ahash::AHashMap as HashMap;
use kubert::index::{ClusterRemoved, IndexClusterResource};
use parking_lot::RwLock;
use std::sync::Arc;
use tenancy_controller_core::allowed_list::CatalogEntry;
use tenancy_controller_k8s_api::{
    self as k8s, Labels, ResourceExt, DEFAULT_INGRESS_CLASS_ANNOTATION,
    DEFAULT_STORAGE_CLASS_ANNOTATION,
};

pub type SharedCatalog = Arc<RwLock<Catalog>>;

/// Cluster-scoped class objects that tenants select from.
#[derive(Debug, Default)]
pub struct Catalog {
    ingress_classes: Classes,
    priority_classes: Classes,
    storage_classes: Classes,
    runtime_classes: Classes,
}

#[derive(Debug, Default)]
struct Classes {
    entries: HashMap<String, CatalogEntry>,

    /// Set once the kind's watch has listed.
    synced: bool,
}

// === impl Catalog ===

impl Catalog {
    pub fn shared() -> SharedCatalog {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn ingress_class(&self, name: &str) -> Option<CatalogEntry> {
        self.ingress_classes.get(name)
    }

    pub fn priority_class(&self, name: &str) -> Option<CatalogEntry> {
        self.priority_classes.get(name)
    }

    pub fn storage_class(&self, name: &str) -> Option<CatalogEntry> {
        self.storage_classes.get(name)
    }

    pub fn runtime_class(&self, name: &str) -> Option<CatalogEntry> {
        self.runtime_classes.get(name)
    }

    /// True once every class watch has listed.
    pub fn is_synced(&self) -> bool {
        self.kinds().iter().all(|c| c.synced)
    }

    pub fn len(&self) -> usize {
        self.kinds().iter().map(|c| c.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kinds(&self) -> [&Classes; 4] {
        [
            &self.ingress_classes,
            &self.priority_classes,
            &self.storage_classes,
            &self.runtime_classes,
        ]
    }
}

// === impl Classes ===

impl Classes {
    fn get(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.get(name).cloned()
    }

    fn insert(&mut self, name: String, labels: Option<k8s::labels::Map>, global_default: bool) {
        let entry = CatalogEntry {
            labels: Labels::from(labels),
            global_default,
        };
        self.entries.insert(name, entry);
    }

    fn reset(&mut self, removed: ClusterRemoved) {
        for name in removed {
            self.entries.remove(&name);
        }
        self.synced = true;
    }
}

fn annotated_default(annotations: &k8s::labels::Map, key: &str) -> bool {
    annotations.get(key).is_some_and(|v| v == "true")
}

impl IndexClusterResource<k8s::IngressClass> for Catalog {
    fn apply(&mut self, class: k8s::IngressClass) {
        let global_default =
            annotated_default(class.annotations(), DEFAULT_INGRESS_CLASS_ANNOTATION);
        self.ingress_classes.insert(
            class.name_unchecked(),
            class.metadata.labels,
            global_default,
        );
    }

    fn delete(&mut self, name: String) {
        self.ingress_classes.entries.remove(&name);
    }

    fn reset(&mut self, classes: Vec<k8s::IngressClass>, removed: ClusterRemoved) {
        for class in classes {
            IndexClusterResource::apply(self, class);
        }
        self.ingress_classes.reset(removed);
    }
}

impl IndexClusterResource<k8s::PriorityClass> for Catalog {
    fn apply(&mut self, class: k8s::PriorityClass) {
        let global_default = class.global_default.unwrap_or(false);
        self.priority_classes.insert(
            class.name_unchecked(),
            class.metadata.labels,
            global_default,
        );
    }

    fn delete(&mut self, name: String) {
        self.priority_classes.entries.remove(&name);
    }

    fn reset(&mut self, classes: Vec<k8s::PriorityClass>, removed: ClusterRemoved) {
        for class in classes {
            IndexClusterResource::apply(self, class);
        }
        self.priority_classes.reset(removed);
    }
}

impl IndexClusterResource<k8s::StorageClass> for Catalog {
    fn apply(&mut self, class: k8s::StorageClass) {
        let global_default =
            annotated_default(class.annotations(), DEFAULT_STORAGE_CLASS_ANNOTATION);
        self.storage_classes.insert(
            class.name_unchecked(),
            class.metadata.labels,
            global_default,
        );
    }

    fn delete(&mut self, name: String) {
        self.storage_classes.entries.remove(&name);
    }

    fn reset(&mut self, classes: Vec<k8s::StorageClass>, removed: ClusterRemoved) {
        for class in classes {
            IndexClusterResource::apply(self, class);
        }
        self.storage_classes.reset(removed);
    }
}

/// RuntimeClasses carry no cluster default marker.
impl IndexClusterResource<k8s::RuntimeClass> for Catalog {
    fn apply(&mut self, class: k8s::RuntimeClass) {
        self.runtime_classes
            .insert(class.name_unchecked(), class.metadata.labels, false);
    }

    fn delete(&mut self, name: String) {
        self.runtime_classes.entries.remove(&name);
    }

    fn reset(&mut self, classes: Vec<k8s::RuntimeClass>, removed: ClusterRemoved) {
        for class in classes {
            IndexClusterResource::apply(self, class);
        }
        self.runtime_classes.reset(removed);
    }
}
