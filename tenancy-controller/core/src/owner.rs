use ahash::AHashSet as HashSet;
use tenancy_controller_k8s_api::tenant::{OwnerKind, OwnerSpec};

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// The identity behind an admission request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Requester {
    pub username: String,
    pub groups: Vec<String>,
}

/// Requesters exempt from tenant restrictions: cluster administrators and
/// the controller itself.
#[derive(Clone, Debug, Default)]
pub struct Privileged {
    users: HashSet<String>,
    groups: HashSet<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("service account owner {0:?} must be named system:serviceaccount:<namespace>:<name>")]
pub struct InvalidServiceAccount(pub String);

// === impl Requester ===

impl Requester {
    pub fn new(username: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Self {
        Self {
            username: username.into(),
            groups: groups.into_iter().collect(),
        }
    }

    pub fn is_owner(&self, owner: &OwnerSpec) -> bool {
        match owner.kind {
            OwnerKind::User | OwnerKind::ServiceAccount => self.username == owner.name,
            OwnerKind::Group => self.groups.iter().any(|g| *g == owner.name),
        }
    }

    pub fn owns(&self, owners: &[OwnerSpec]) -> bool {
        owners.iter().any(|o| self.is_owner(o))
    }
}

// === impl Privileged ===

impl Privileged {
    pub fn new(
        users: impl IntoIterator<Item = String>,
        groups: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            users: users.into_iter().filter(|u| !u.is_empty()).collect(),
            groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
        }
    }

    pub fn contains(&self, requester: &Requester) -> bool {
        self.users.contains(&requester.username)
            || requester.groups.iter().any(|g| self.groups.contains(g))
    }
}

/// Checks that a service account owner is `system:serviceaccount:<ns>:<name>`.
pub fn validate_service_account(name: &str) -> Result<(), InvalidServiceAccount> {
    let valid = name
        .strip_prefix(SERVICE_ACCOUNT_PREFIX)
        .and_then(|rest| rest.split_once(':'))
        .is_some_and(|(ns, sa)| !ns.is_empty() && !sa.is_empty() && !sa.contains(':'));
    if valid {
        Ok(())
    } else {
        Err(InvalidServiceAccount(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(kind: OwnerKind, name: &str) -> OwnerSpec {
        OwnerSpec {
            kind,
            name: name.to_string(),
            cluster_roles: vec![],
        }
    }

    #[test]
    fn matches_owner_kinds() {
        let alice = Requester::new("alice", vec!["devs".to_string()]);
        assert!(alice.is_owner(&owner(OwnerKind::User, "alice")));
        assert!(!alice.is_owner(&owner(OwnerKind::User, "bob")));
        assert!(alice.is_owner(&owner(OwnerKind::Group, "devs")));
        assert!(!alice.is_owner(&owner(OwnerKind::Group, "alice")));

        let robot = Requester::new("system:serviceaccount:ci:deployer", vec![]);
        assert!(robot.owns(&[
            owner(OwnerKind::User, "alice"),
            owner(OwnerKind::ServiceAccount, "system:serviceaccount:ci:deployer"),
        ]));
    }

    #[test]
    fn privileged_by_user_or_group() {
        let privileged = Privileged::new(
            vec!["root".to_string()],
            vec!["system:masters".to_string()],
        );
        assert!(privileged.contains(&Requester::new("root", vec![])));
        assert!(privileged.contains(&Requester::new(
            "carol",
            vec!["system:masters".to_string()]
        )));
        assert!(!privileged.contains(&Requester::new("alice", vec!["devs".to_string()])));
    }

    #[test]
    fn service_account_format() {
        assert!(validate_service_account("system:serviceaccount:ci:deployer").is_ok());
        assert!(validate_service_account("deployer").is_err());
        assert!(validate_service_account("system:serviceaccount:ci").is_err());
        assert!(validate_service_account("system:serviceaccount::deployer").is_err());
    }
}
