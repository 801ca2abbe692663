use super::Write;
use crate::core::{node_metadata::NodeMetadataGuard, Operation, Violation};

/// Keeps non-privileged requesters from changing protected node labels and
/// annotations.
pub(super) fn admit(guard: &NodeMetadataGuard, write: &Write<'_>) -> Result<(), Violation> {
    if write.privileged || write.op != Operation::Update {
        return Ok(());
    }
    let (Some(old), Some(new)) = (write.req.old_object.as_ref(), write.req.object.as_ref()) else {
        return Ok(());
    };
    guard.check(&old.metadata, &new.metadata)
}
