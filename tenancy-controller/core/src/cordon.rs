use crate::Violation;

/// The operation an admission request performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl Operation {
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// Denies every mutating operation in a cordoned tenant.
///
/// The flag is read per request, so toggling it only affects later
/// admissions.
pub fn check(tenant: &str, cordoned: bool, op: Operation) -> Result<(), Violation> {
    if cordoned && op.is_mutating() {
        return Err(Violation::Cordoned {
            tenant: tenant.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freezes_writes_only() {
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(
                check("solar", true, op),
                Err(Violation::Cordoned {
                    tenant: "solar".to_string()
                })
            );
            assert_eq!(check("solar", false, op), Ok(()));
        }
        assert_eq!(check("solar", true, Operation::Connect), Ok(()));
    }

    #[test]
    fn reason_names_the_tenant() {
        let err = check("solar", true, Operation::Delete).unwrap_err();
        assert_eq!(
            err.to_string(),
            "tenant solar is freezed: please, reach out to the system administrator"
        );
    }
}
