//! Raw identity-store backend interface.
//!
//! The OS user/group database is reached through this trait so the
//! daemon logic stays independent of the mechanism used to edit it.
//! Every call opens whatever context it needs and releases it before
//! returning; implementations hold no state between calls.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for identity-store operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors from the identity store.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// A backend command could not be spawned.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A backend command ran and reported failure.
    #[error("{command} exited with {status}: {stderr}")]
    Command {
        /// The command that failed.
        command: String,
        /// Exit status of the command.
        status: std::process::ExitStatus,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// No user with the given name or UID exists.
    #[error("user not found")]
    UserNotFound,

    /// No group with the given name or GID exists.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Display names may not contain `,` or `:`.
    #[error("invalid name, comma or colon is not allowed")]
    InvalidDisplayName,

    /// The backend assigned no usable id to a new record.
    #[error("invalid id assigned by backend")]
    InvalidId,
}

/// One passwd entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    /// Login name.
    pub name: String,
    /// User id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// GECOS field, `"<display name>,<uuid>"` for managed users.
    pub gecos: String,
    /// Home directory.
    pub home: PathBuf,
}

/// One group entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    /// Group name.
    pub name: String,
    /// Group id.
    pub gid: u32,
    /// Member usernames (supplementary membership only).
    pub members: Vec<String>,
}

/// Raw operations against the OS user/group database.
///
/// Lookups return `None` for missing records; only real backend failures
/// surface as errors.
pub trait IdentityBackend: Send + Sync {
    /// Look up a passwd entry by login name.
    fn user_by_name(&self, name: &str) -> Option<UserRecord>;

    /// Look up a passwd entry by UID.
    fn user_by_uid(&self, uid: u32) -> Option<UserRecord>;

    /// Look up a group by name.
    fn group_by_name(&self, name: &str) -> Option<GroupRecord>;

    /// Look up a group by GID.
    fn group_by_gid(&self, gid: u32) -> Option<GroupRecord>;

    /// Names of all groups listing `name` as a member.
    fn groups_of_user(&self, name: &str) -> Result<Vec<String>>;

    /// Create a group, optionally with an explicit GID. Returns the
    /// assigned GID.
    fn create_group(&self, name: &str, gid: Option<u32>) -> Result<u32>;

    /// Delete a group by name.
    fn delete_group(&self, name: &str) -> Result<()>;

    /// Create a user record. The primary group must exist already.
    /// Returns the assigned UID.
    fn create_user(
        &self,
        name: &str,
        gecos: &str,
        uid: Option<u32>,
        gid: u32,
        home: Option<&Path>,
    ) -> Result<u32>;

    /// Delete a user record by name.
    fn delete_user(&self, name: &str) -> Result<()>;

    /// Replace the GECOS field of a user.
    fn set_gecos(&self, name: &str, gecos: &str) -> Result<()>;

    /// Add `user` to the member list of `group`.
    fn add_to_group(&self, user: &str, group: &str) -> Result<()>;

    /// Remove `user` from the member list of `group`.
    fn remove_from_group(&self, user: &str, group: &str) -> Result<()>;
}
