//! Active-user tracking via systemd-logind.
//!
//! The device has exactly one seat; whoever owns the active session on
//! `seat0` is the current user.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

/// Reports the UID active on the seat.
#[async_trait]
pub trait SeatTracker: Send + Sync {
    /// UID owning the active session on `seat0`.
    async fn active_uid(&self) -> Result<u32>;
}

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    #[zbus(name = "GetSeat")]
    fn get_seat(&self, seat_id: &str) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.login1.Seat",
    default_service = "org.freedesktop.login1"
)]
trait Login1Seat {
    #[zbus(property)]
    fn active_session(&self) -> zbus::Result<(String, OwnedObjectPath)>;
}

#[zbus::proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1"
)]
trait Login1Session {
    #[zbus(property)]
    fn user(&self) -> zbus::Result<(u32, OwnedObjectPath)>;
}

/// [`SeatTracker`] over systemd-logind on the system bus.
pub struct LogindSeatTracker {
    connection: Connection,
}

impl LogindSeatTracker {
    /// Track seats through `connection`.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl SeatTracker for LogindSeatTracker {
    async fn active_uid(&self) -> Result<u32> {
        let manager = Login1ManagerProxy::new(&self.connection)
            .await
            .context("Failed to create logind manager proxy")?;
        let seat_path = manager.get_seat("seat0").await.context("No seat0")?;

        let seat = Login1SeatProxy::builder(&self.connection)
            .path(seat_path)?
            .build()
            .await
            .context("Failed to create seat proxy")?;
        let (session_id, session_path) = seat
            .active_session()
            .await
            .context("Failed to read active session")?;
        if session_path.as_str() == "/" {
            bail!("no active session on seat0");
        }
        debug!("active session on seat0 is {session_id}");

        let session = Login1SessionProxy::builder(&self.connection)
            .path(session_path)?
            .build()
            .await
            .context("Failed to create session proxy")?;
        let (uid, _user_path) = session.user().await.context("Failed to read session user")?;
        Ok(uid)
    }
}
