use crate::Violation;
use ahash::AHashSet as HashSet;
use regex::Regex;
use std::collections::BTreeMap;
use tenancy_controller_k8s_api::ObjectMeta;

/// Node label or annotation keys that tenant owners may not add, change or
/// remove.
#[derive(Clone, Debug, Default)]
pub struct ForbiddenKeys {
    exact: HashSet<String>,
    regex: Option<Regex>,
}

/// Guards node labels and annotations.
#[derive(Clone, Debug, Default)]
pub struct NodeMetadataGuard {
    pub labels: ForbiddenKeys,
    pub annotations: ForbiddenKeys,
}

// === impl ForbiddenKeys ===

impl ForbiddenKeys {
    pub fn new(
        exact: impl IntoIterator<Item = String>,
        regex: Option<&str>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            exact: exact.into_iter().filter(|k| !k.is_empty()).collect(),
            regex: regex.filter(|r| !r.is_empty()).map(Regex::new).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.regex.is_none()
    }

    fn is_forbidden(&self, key: &str) -> bool {
        self.exact.contains(key) || self.regex.as_ref().is_some_and(|re| re.is_match(key))
    }

    /// Returns the first forbidden key whose value differs between the two
    /// maps, including additions and removals.
    pub fn first_changed(
        &self,
        old: Option<&BTreeMap<String, String>>,
        new: Option<&BTreeMap<String, String>>,
    ) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let empty = BTreeMap::new();
        let old = old.unwrap_or(&empty);
        let new = new.unwrap_or(&empty);
        old.keys()
            .chain(new.keys())
            .filter(|k| self.is_forbidden(k))
            .find(|k| old.get(*k) != new.get(*k))
            .cloned()
    }
}

// === impl NodeMetadataGuard ===

impl NodeMetadataGuard {
    pub fn check(&self, old: &ObjectMeta, new: &ObjectMeta) -> Result<(), Violation> {
        if let Some(key) = self
            .labels
            .first_changed(old.labels.as_ref(), new.labels.as_ref())
        {
            return Err(Violation::ForbiddenNodeMetadata {
                kind: "label".to_string(),
                key,
            });
        }
        if let Some(key) = self
            .annotations
            .first_changed(old.annotations.as_ref(), new.annotations.as_ref())
        {
            return Err(Violation::ForbiddenNodeMetadata {
                kind: "annotation".to_string(),
                key,
            });
        }
        Ok(())
    }
}
