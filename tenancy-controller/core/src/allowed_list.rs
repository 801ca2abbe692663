use crate::{labels::Selector, Labels};
use regex::Regex;
use std::fmt;
use tenancy_controller_k8s_api::tenant::{AllowedListSpec, DefaultAllowedListSpec};

/// Exact names plus an optional regular expression.
///
/// An empty list places no constraint on its dimension.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    exact: Vec<String>,
    regex: Option<Regex>,
}

/// An [`AllowList`] over a cluster-scoped catalog (IngressClasses,
/// PriorityClasses) with a label selector and an optional tenant default.
#[derive(Clone, Debug, Default)]
pub struct ClassList {
    list: AllowList,
    selector: Selector,
    default: Option<String>,
}

/// What the catalog knows about a class object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub labels: Labels,
    /// Set when the object is marked as the cluster-wide default.
    pub global_default: bool,
}

// === impl AllowList ===

impl AllowList {
    pub fn compile(spec: &AllowedListSpec) -> Result<Self, regex::Error> {
        let regex = match spec.allowed_regex.as_deref() {
            Some(re) if !re.is_empty() => Some(Regex::new(re)?),
            _ => None,
        };
        Ok(Self {
            exact: spec.allowed.clone(),
            regex,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.regex.is_none()
    }

    /// True when the candidate is an exact entry or matches the regex.
    pub fn matches(&self, candidate: &str) -> bool {
        self.exact.iter().any(|e| e == candidate)
            || self.regex.as_ref().is_some_and(|re| re.is_match(candidate))
    }

    /// Like [`AllowList::matches`], but an empty list allows everything.
    pub fn allows(&self, candidate: &str) -> bool {
        self.is_empty() || self.matches(candidate)
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(2);
        if !self.exact.is_empty() {
            parts.push(format!(
                "use one from the following list ({})",
                self.exact.join(", ")
            ));
        }
        if let Some(re) = &self.regex {
            parts.push(format!("use one matching the following regex ({re})"));
        }
        if parts.is_empty() {
            return f.write_str("any value is allowed");
        }
        f.write_str(&parts.join(" or "))
    }
}

// === impl ClassList ===

impl ClassList {
    pub fn compile(spec: &DefaultAllowedListSpec) -> Result<Self, regex::Error> {
        Ok(Self {
            list: AllowList::compile(&spec.list)?,
            selector: spec.selector.clone(),
            default: spec.default.clone().filter(|d| !d.is_empty()),
        })
    }

    pub fn default_class(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// True when neither names nor a selector constrain the classes.
    pub fn is_unconstrained(&self) -> bool {
        self.list.is_empty() && self.selector.is_empty()
    }

    /// Returns the class an object must be mutated to, if any.
    ///
    /// Objects without a class receive the tenant default. Objects naming a
    /// class marked as the cluster default receive the tenant default when it
    /// differs. The default need not exist in the catalog.
    pub fn resolve_default(
        &self,
        requested: Option<&str>,
        lookup: impl Fn(&str) -> Option<CatalogEntry>,
    ) -> Option<String> {
        let default = self.default.as_deref()?;
        match requested {
            None => Some(default.to_string()),
            Some(name) if name == default => None,
            Some(name) => lookup(name)
                .filter(|entry| entry.global_default)
                .map(|_| default.to_string()),
        }
    }

    /// Checks an explicit class against the tenant's constraints.
    ///
    /// `entry` is the catalog object for the class, when it exists.
    pub fn allows(&self, name: &str, entry: Option<&CatalogEntry>) -> bool {
        if self.default.as_deref() == Some(name) || self.is_unconstrained() {
            return true;
        }
        if self.list.matches(name) {
            return true;
        }
        !self.selector.is_empty() && entry.is_some_and(|e| self.selector.matches(&e.labels))
    }
}

impl fmt::Display for ClassList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.list.is_empty() {
            parts.push(self.list.to_string());
        }
        if !self.selector.is_empty() {
            parts.push(format!("use one selected by ({})", self.selector));
        }
        if let Some(default) = &self.default {
            parts.push(format!("use the tenant default ({default})"));
        }
        if parts.is_empty() {
            return f.write_str("any class is allowed");
        }
        f.write_str(&parts.join(" or "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::iter::FromIterator;

    fn list(exact: &[&str], regex: Option<&str>) -> AllowList {
        AllowList::compile(&AllowedListSpec {
            allowed: exact.iter().map(|s| s.to_string()).collect(),
            allowed_regex: regex.map(Into::into),
        })
        .expect("list must compile")
    }

    fn classes(exact: &[&str], selector: Selector, default: Option<&str>) -> ClassList {
        ClassList::compile(&DefaultAllowedListSpec {
            list: AllowedListSpec {
                allowed: exact.iter().map(|s| s.to_string()).collect(),
                allowed_regex: None,
            },
            selector,
            default: default.map(Into::into),
        })
        .expect("list must compile")
    }

    #[rstest]
    #[case(&[], None, "anything", true)]
    #[case(&[], Some(""), "anything", true)]
    #[case(&["nginx"], None, "nginx", true)]
    #[case(&["nginx"], None, "haproxy", false)]
    #[case(&["nginx"], Some("^internal-.*$"), "internal-a", true)]
    #[case(&[], Some("^internal-.*$"), "external-a", false)]
    #[case(&["nginx"], Some(""), "other", false)]
    fn allow_list_membership(
        #[case] exact: &[&str],
        #[case] regex: Option<&str>,
        #[case] candidate: &str,
        #[case] allowed: bool,
    ) {
        assert_eq!(list(exact, regex).allows(candidate), allowed);
    }

    #[test]
    fn empty_regex_never_matches() {
        let l = list(&["a"], Some(""));
        assert!(!l.matches(""));
        assert!(!l.matches("b"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(AllowList::compile(&AllowedListSpec {
            allowed: vec![],
            allowed_regex: Some("(".into()),
        })
        .is_err());
    }

    #[test]
    fn allow_list_describes_itself() {
        assert_eq!(
            list(&["a", "b"], Some("^c$")).to_string(),
            "use one from the following list (a, b) or use one matching the following regex (^c$)"
        );
    }

    #[test]
    fn unset_class_receives_tenant_default() {
        let c = classes(&["nginx"], Selector::default(), Some("tenant-default"));
        assert_eq!(
            c.resolve_default(None, |_| None),
            Some("tenant-default".to_string())
        );
    }

    #[test]
    fn global_default_is_replaced_by_tenant_default() {
        let c = classes(&["global"], Selector::default(), Some("tenant-default"));
        let global = |_: &str| {
            Some(CatalogEntry {
                labels: Labels::default(),
                global_default: true,
            })
        };

        // Allowed or not, the global default yields to the tenant default.
        assert_eq!(
            c.resolve_default(Some("global"), global),
            Some("tenant-default".to_string())
        );
        let strict = classes(&["other"], Selector::default(), Some("tenant-default"));
        assert_eq!(
            strict.resolve_default(Some("global"), global),
            Some("tenant-default".to_string())
        );
    }

    #[test]
    fn explicit_class_is_kept() {
        let c = classes(&["nginx"], Selector::default(), Some("tenant-default"));
        assert_eq!(c.resolve_default(Some("nginx"), |_| None), None);
        assert_eq!(c.resolve_default(Some("tenant-default"), |_| None), None);
        let no_default = classes(&["nginx"], Selector::default(), None);
        assert_eq!(no_default.resolve_default(None, |_| None), None);
    }

    #[test]
    fn selector_admits_labeled_classes() {
        let c = classes(
            &[],
            Selector::from_iter(Some(("env", "customers"))),
            Some("tenant-default"),
        );
        let labeled = CatalogEntry {
            labels: Labels::from_iter(Some(("env", "customers"))),
            global_default: false,
        };
        assert!(c.allows("labeled", Some(&labeled)));
        assert!(!c.allows("unlabeled", Some(&CatalogEntry::default())));
        assert!(!c.allows("missing", None));
        assert!(c.allows("tenant-default", None));
    }
}
