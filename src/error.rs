//! D-Bus error surface
//!
//! Every error a client can observe corresponds to a named error reply
//! under the `org.sailfishos.usermanager.Error` prefix, next to the
//! transport-standard `InvalidArgs`, `AccessDenied` and `Failed` replies.

use zbus::DBusError;

/// Errors replied to D-Bus clients.
///
/// The variant name is the wire name: `Busy` is replied as
/// `org.sailfishos.usermanager.Error.Busy` and so on.
#[derive(DBusError, Debug)]
#[zbus(prefix = "org.sailfishos.usermanager.Error")]
pub enum ManagerError {
    /// Pass-through for zbus transport errors and the standard
    /// `org.freedesktop.DBus.Error.*` replies.
    #[zbus(error)]
    ZBus(zbus::Error),
    /// Another user switch is already in progress, or a call is active.
    Busy(String),
    /// Provisioning the home directory failed.
    HomeCreateFailed(String),
    /// Removing the home directory failed.
    HomeRemoveFailed(String),
    /// Creating the user's primary group failed.
    GroupCreateFailed(String),
    /// Inserting the user record failed.
    UserAddFailed(String),
    /// The device already hosts the maximum number of users.
    MaxUsersReached(String),
    /// Changing the user record failed.
    UserModifyFailed(String),
    /// Deleting the user record failed.
    UserRemoveFailed(String),
    /// The active UID on seat0 could not be determined.
    GetUidFailed(String),
    /// The user's UUID could not be read or created.
    GetUuidFailed(String),
    /// No managed user with the given UID exists.
    UserNotFound(String),
    /// Adding the user to a permission group failed.
    AddToGroupFailed(String),
    /// Removing the user from a permission group failed.
    RemoveFromGroupFailed(String),
}

impl ManagerError {
    /// Standard `org.freedesktop.DBus.Error.InvalidArgs` reply.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::ZBus(zbus::Error::FDO(Box::new(zbus::fdo::Error::InvalidArgs(
            message.into(),
        ))))
    }

    /// Standard `org.freedesktop.DBus.Error.AccessDenied` reply.
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::ZBus(zbus::Error::FDO(Box::new(zbus::fdo::Error::AccessDenied(
            message.into(),
        ))))
    }

    /// Standard `org.freedesktop.DBus.Error.Failed` reply.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ZBus(zbus::Error::FDO(Box::new(zbus::fdo::Error::Failed(
            message.into(),
        ))))
    }
}

impl From<zbus::fdo::Error> for ManagerError {
    fn from(err: zbus::fdo::Error) -> Self {
        Self::ZBus(zbus::Error::FDO(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::names::ErrorName;
    use zbus::DBusError;

    fn name(err: &ManagerError) -> ErrorName<'_> {
        err.name()
    }

    #[test]
    fn error_names_carry_the_interface_prefix() {
        assert_eq!(
            name(&ManagerError::Busy("busy".into())).as_str(),
            "org.sailfishos.usermanager.Error.Busy"
        );
        assert_eq!(
            name(&ManagerError::MaxUsersReached("full".into())).as_str(),
            "org.sailfishos.usermanager.Error.MaxUsersReached"
        );
        assert_eq!(
            name(&ManagerError::RemoveFromGroupFailed("no".into())).as_str(),
            "org.sailfishos.usermanager.Error.RemoveFromGroupFailed"
        );
    }

    #[test]
    fn standard_errors_keep_their_freedesktop_names() {
        assert_eq!(
            name(&ManagerError::invalid_args("bad")).as_str(),
            "org.freedesktop.DBus.Error.InvalidArgs"
        );
        assert_eq!(
            name(&ManagerError::access_denied("no")).as_str(),
            "org.freedesktop.DBus.Error.AccessDenied"
        );
        assert_eq!(
            name(&ManagerError::failed("oops")).as_str(),
            "org.freedesktop.DBus.Error.Failed"
        );
    }
}
