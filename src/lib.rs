//! user-managerd library
//!
//! User management daemon for a single-seat mobile device. Exposes the
//! `org.sailfishos.usermanager` interface on the system bus for listing,
//! creating, removing and modifying device users, switching the active
//! user and toggling the transient guest user.

#![warn(clippy::all)]

pub mod access;
pub mod config;
pub mod environment;
pub mod error;
pub mod homes;
pub mod identity;
pub mod manager;
pub mod mce;
pub mod quota;
pub mod seat;
pub mod systemd;
pub mod types;

/// Well-known name of the service on the system bus.
pub const SERVICE_NAME: &str = "org.sailfishos.usermanager";

/// Object path the manager interface is served at.
pub const OBJECT_PATH: &str = "/";

/// OS group whose membership defines the managed-user population.
pub const USER_GROUP: &str = "users";

/// UIDs at or below this value are system users and are never touched.
pub const MAX_RESERVED_UID: u32 = 99_999;

/// The first provisioned user. Can never be removed.
pub const OWNER_USER_UID: u32 = 100_000;

/// Fixed UID of the transient guest user.
pub const GUEST_UID: u32 = 105_000;

/// Username of the transient guest user.
pub const GUEST_USER: &str = "sailfish-guest";

// LUKS has eight key slots and one of them is reserved for backup.
/// Maximum number of users on the device, device owner included.
pub const MAX_USERS: u32 = 7;

/// Sentinel UID meaning "no target user" in authorization checks.
pub const UNDEFINED_UID: u32 = u32::MAX;

/// Usernames derived from display names are truncated to this length.
pub const MAX_USERNAME_LENGTH: usize = 20;

/// systemd target started as a fallback when a switch goes sideways.
pub const DEFAULT_TARGET: &str = "default.target";

const _: () = assert!(UNDEFINED_UID > MAX_RESERVED_UID);

/// Name of the session service unit of `uid`.
pub fn user_service(uid: u32) -> String {
    format!("user@{uid}.service")
}

/// Name of the autologin service unit of `uid`.
pub fn autologin_service(uid: u32) -> String {
    format!("autologin@{uid}.service")
}
