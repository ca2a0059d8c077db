//! Wire types of the manager interface.

use serde::{Deserialize, Serialize};
use zbus::zvariant::Type;

/// One managed user as reported by `users()` and the `userAdded` signal.
///
/// Serialized as a `(ssu)` struct on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct UserEntry {
    /// Username (login name).
    pub user: String,
    /// Real name as shown in user interfaces.
    pub name: String,
    /// User identifier.
    pub uid: u32,
}
