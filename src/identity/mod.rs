//! Identity store adapter.
//!
//! [`UserHelper`] carries the daemon's conventions for user records on top
//! of a raw [`IdentityBackend`]: every user owns a same-named primary
//! group, the GECOS field stores `"<display name>,<uuid>"`, and failed
//! multi-step operations clean up after themselves.

pub mod backend;
#[cfg(test)]
pub mod memory;
pub mod shadow;

pub use backend::{GroupRecord, IdentityBackend, IdentityError, UserRecord};
pub use shadow::ShadowBackend;

use crate::types::UserEntry;
use crate::USER_GROUP;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// High-level identity operations used by the manager.
pub struct UserHelper {
    backend: Box<dyn IdentityBackend>,
}

impl UserHelper {
    /// Wrap a backend.
    pub fn new(backend: Box<dyn IdentityBackend>) -> Self {
        Self { backend }
    }

    /// Create a group, optionally with an explicit GID. Returns the GID.
    pub fn add_group(&self, name: &str, gid: Option<u32>) -> Result<u32, IdentityError> {
        self.backend.create_group(name, gid)
    }

    /// Remove the group with `gid`.
    pub fn remove_group(&self, gid: u32) -> Result<(), IdentityError> {
        let group = self
            .backend
            .group_by_gid(gid)
            .ok_or_else(|| IdentityError::GroupNotFound(gid.to_string()))?;
        self.backend.delete_group(&group.name)
    }

    /// Create a user with a same-named primary group and a fresh UUID in
    /// the GECOS field. Returns the assigned UID.
    ///
    /// The just-created group is removed again when the user insertion
    /// itself fails, so a failed call leaves no trace.
    pub fn add_user(
        &self,
        username: &str,
        display: &str,
        uid: Option<u32>,
        home: Option<&Path>,
    ) -> Result<u32, IdentityError> {
        if display.contains(',') || display.contains(':') {
            warn!("invalid user name, comma or colon is not allowed");
            return Err(IdentityError::InvalidDisplayName);
        }

        let gid = self.add_group(username, uid)?;
        let gecos = format!("{display},{}", Uuid::new_v4());

        match self.backend.create_user(username, &gecos, uid, gid, home) {
            Ok(new_uid) => {
                if let Some(requested) = uid {
                    if new_uid != requested {
                        warn!("user id {new_uid} is different from requested id {requested}");
                    }
                }
                if gid != new_uid {
                    warn!("group id {gid} is not the same as user id {new_uid}");
                }
                Ok(new_uid)
            }
            Err(err) => {
                // Clean up after the failed user add attempt.
                if let Err(group_err) = self.remove_group(gid) {
                    warn!("group delete failed: {group_err}");
                }
                Err(err)
            }
        }
    }

    /// Remove the user with `uid` together with its group memberships and
    /// primary group. Membership and group removal failures are logged
    /// and skipped; only a failed user deletion fails the call.
    pub fn remove_user(&self, uid: u32) -> Result<(), IdentityError> {
        let user = self.backend.user_by_uid(uid).ok_or_else(|| {
            warn!("could not find user {uid}");
            IdentityError::UserNotFound
        })?;

        match self.backend.groups_of_user(&user.name) {
            Ok(groups) => {
                for group in groups {
                    if let Err(err) = self.backend.remove_from_group(&user.name, &group) {
                        warn!("group modify failed: {err}");
                    }
                }
            }
            Err(err) => warn!("error getting user's groups: {err}"),
        }

        match self.backend.group_by_gid(user.gid) {
            Some(group) => {
                if let Err(err) = self.backend.delete_group(&group.name) {
                    warn!("group delete failed: {err}");
                }
            }
            None => warn!("could not find primary group of {}", user.name),
        }

        self.backend.delete_user(&user.name)
    }

    /// Add `user` to `group`.
    pub fn add_member(&self, user: &str, group: &str) -> Result<(), IdentityError> {
        self.backend.add_to_group(user, group)
    }

    /// Remove `user` from `group`.
    pub fn remove_member(&self, user: &str, group: &str) -> Result<(), IdentityError> {
        self.backend.remove_from_group(user, group)
    }

    /// Home directory of `uid`, if the user exists.
    pub fn home_of(&self, uid: u32) -> Option<std::path::PathBuf> {
        self.backend.user_by_uid(uid).map(|user| user.home)
    }

    /// Supplementary groups of `uid`. Empty when the user is missing or
    /// enumeration fails.
    pub fn groups_of(&self, uid: u32) -> Vec<String> {
        let Some(user) = self.backend.user_by_uid(uid) else {
            warn!("could not find user {uid}");
            return Vec::new();
        };
        match self.backend.groups_of_user(&user.name) {
            Ok(groups) => groups,
            Err(err) => {
                warn!("error getting user's groups: {err}");
                Vec::new()
            }
        }
    }

    /// Change the display name of `uid`, preserving the stored UUID.
    /// A missing UUID is created on the fly.
    pub fn modify_display(&self, uid: u32, new_display: &str) -> Result<(), IdentityError> {
        if new_display.contains(',') || new_display.contains(':') {
            warn!("invalid new user name, comma or colon is not allowed");
            return Err(IdentityError::InvalidDisplayName);
        }
        let user = self
            .backend
            .user_by_uid(uid)
            .ok_or(IdentityError::UserNotFound)?;
        let gecos = match user.gecos.split(',').nth(1).filter(|uuid| !uuid.is_empty()) {
            Some(uuid) => format!("{new_display},{uuid}"),
            None => format!("{new_display},{}", Uuid::new_v4()),
        };
        self.backend.set_gecos(&user.name, &gecos)
    }

    /// UUID of `uid`. When the record has none yet, one is created by
    /// rewriting the display name, then read back.
    pub fn read_uuid(&self, uid: u32) -> Option<String> {
        let user = self.backend.user_by_uid(uid)?;
        let mut fields = user.gecos.split(',');
        let display = fields.next().unwrap_or("").to_string();
        if let Some(uuid) = fields.next().filter(|uuid| !uuid.is_empty()) {
            return Some(uuid.to_string());
        }
        if let Err(err) = self.modify_display(uid, &display) {
            warn!("could not store uuid for {uid}: {err}");
            return None;
        }
        let user = self.backend.user_by_uid(uid)?;
        user.gecos
            .split(',')
            .nth(1)
            .filter(|uuid| !uuid.is_empty())
            .map(str::to_string)
    }

    /// Members of the `users` group that have a passwd record.
    pub fn managed_users(&self) -> Result<Vec<UserRecord>, IdentityError> {
        let group = self
            .backend
            .group_by_name(USER_GROUP)
            .ok_or_else(|| IdentityError::GroupNotFound(USER_GROUP.to_string()))?;
        Ok(group
            .members
            .iter()
            .filter_map(|member| self.backend.user_by_name(member))
            .collect())
    }

    /// Managed users as interface entries, display name trimmed to the
    /// part before the UUID.
    pub fn list_users(&self) -> Result<Vec<UserEntry>, IdentityError> {
        Ok(self
            .managed_users()?
            .into_iter()
            .map(|user| UserEntry {
                name: display_name(&user.gecos),
                user: user.name,
                uid: user.uid,
            })
            .collect())
    }

    /// Passwd record of `name`, if any.
    pub fn user_by_name(&self, name: &str) -> Option<UserRecord> {
        self.backend.user_by_name(name)
    }

    /// Passwd record of `uid`, if any.
    pub fn user_by_uid(&self, uid: u32) -> Option<UserRecord> {
        self.backend.user_by_uid(uid)
    }

    /// Whether a group with `name` exists.
    pub fn group_exists(&self, name: &str) -> bool {
        self.backend.group_by_name(name).is_some()
    }

    /// Group name for `gid`, if any.
    pub fn group_name_of_gid(&self, gid: u32) -> Option<String> {
        self.backend.group_by_gid(gid).map(|group| group.name)
    }

    /// Whether `uid` belongs to `group`, by primary GID or membership.
    pub fn uid_in_group(&self, uid: u32, group: &str) -> bool {
        let Some(user) = self.backend.user_by_uid(uid) else {
            return false;
        };
        let Some(group) = self.backend.group_by_name(group) else {
            return false;
        };
        group.gid == user.gid || group.members.iter().any(|member| *member == user.name)
    }
}

/// Display-name part of a GECOS field (everything before the first comma).
pub fn display_name(gecos: &str) -> String {
    gecos.split(',').next().unwrap_or("").to_string()
}
