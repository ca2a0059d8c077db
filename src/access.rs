//! Caller authorization.
//!
//! Every mutating call resolves the caller's UID from the bus connection
//! and checks it against the per-operation policy: root may do anything,
//! `privileged` membership is required to talk to the daemon at all, and
//! only `sailfish-system` members may touch users other than themselves.

use crate::error::ManagerError;
use crate::identity::UserHelper;
use crate::MAX_RESERVED_UID;
use std::os::unix::fs::MetadataExt;
use tracing::warn;
use zbus::message::Header;
use zbus::names::BusName;
use zbus::Connection;

const PRIVILEGED_GROUP: &str = "privileged";
const SYSTEM_GROUP: &str = "sailfish-system";

/// Resolve the UID of the calling process and verify it is allowed to
/// talk to the daemon.
///
/// Calls without a sender (local invocations) resolve to root. The
/// `/proc/<pid>` directory is owned by the EUID:EGID of the process, so
/// its metadata identifies the peer.
pub async fn caller_uid(
    users: &UserHelper,
    header: &Header<'_>,
    connection: &Connection,
) -> Result<u32, ManagerError> {
    let Some(sender) = header.sender() else {
        // Local function calls are always allowed.
        return Ok(0);
    };

    let dbus = zbus::fdo::DBusProxy::new(connection).await?;
    let pid = dbus
        .get_connection_unix_process_id(BusName::Unique(sender.to_owned()))
        .await?;

    let meta = std::fs::metadata(format!("/proc/{pid}")).map_err(|err| {
        warn!("cannot stat process {pid}: {err}");
        ManagerError::failed(format!("Cannot identify calling process {pid}"))
    })?;

    let uid = meta.uid();
    if uid == 0 {
        // Root is always allowed to make changes.
        return Ok(0);
    }

    let process_group = users.group_name_of_gid(meta.gid());
    if process_group.as_deref() != Some(PRIVILEGED_GROUP)
        && !users.uid_in_group(uid, PRIVILEGED_GROUP)
    {
        let message = format!("PID {pid} is not in privileged group");
        warn!("Access denied: {message}");
        return Err(ManagerError::access_denied(message));
    }

    Ok(uid)
}

/// Check that the caller may modify the user with `uid_to_modify`.
///
/// Pass [`crate::UNDEFINED_UID`] when the operation has no single target
/// user; it is in the valid range but matches no caller.
pub async fn check_access(
    users: &UserHelper,
    header: &Header<'_>,
    connection: &Connection,
    uid_to_modify: u32,
) -> Result<(), ManagerError> {
    // UNDEFINED_UID is above the reserved range by definition.
    if uid_to_modify <= MAX_RESERVED_UID {
        let message = format!("UID {MAX_RESERVED_UID} and below can not be modified");
        warn!("Invalid arg: {message}");
        return Err(ManagerError::invalid_args(message));
    }

    let caller = caller_uid(users, header, connection).await?;

    if !may_modify(caller, uid_to_modify, users.uid_in_group(caller, SYSTEM_GROUP)) {
        let message = format!("UID {caller} is not allowed to modify UID {uid_to_modify}");
        warn!("Access denied: {message}");
        return Err(ManagerError::access_denied(message));
    }

    Ok(())
}

/// Users in `sailfish-system` can change any user, other users can only
/// modify themselves.
fn may_modify(caller: u32, uid_to_modify: u32, caller_in_system_group: bool) -> bool {
    caller == 0 || caller_in_system_group || caller == uid_to_modify
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UNDEFINED_UID;

    #[test]
    fn root_may_modify_anyone() {
        assert!(may_modify(0, 100001, false));
        assert!(may_modify(0, UNDEFINED_UID, false));
    }

    #[test]
    fn system_group_may_modify_anyone() {
        assert!(may_modify(100001, 100002, true));
        assert!(may_modify(100001, UNDEFINED_UID, true));
    }

    #[test]
    fn plain_users_may_only_modify_themselves() {
        assert!(may_modify(100001, 100001, false));
        assert!(!may_modify(100001, 100002, false));
        assert!(!may_modify(100001, UNDEFINED_UID, false));
    }
}
