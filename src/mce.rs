//! Voice-call state from the Mode Control Entity.
//!
//! User switching is refused while a call is active or ringing; tearing
//! down the session would drop the call.

use async_trait::async_trait;
use tracing::warn;
use zbus::Connection;

const CALL_STATE_ACTIVE: &str = "active";
const CALL_STATE_RINGING: &str = "ringing";

/// Reports whether a voice call would be interrupted by a user switch.
#[async_trait]
pub trait CallMonitor: Send + Sync {
    /// True when a call is active or ringing.
    async fn call_in_progress(&self) -> bool;
}

#[zbus::proxy(
    interface = "com.nokia.mce.request",
    default_service = "com.nokia.mce",
    default_path = "/com/nokia/mce/request"
)]
trait MceRequest {
    #[zbus(name = "get_call_state")]
    fn get_call_state(&self) -> zbus::Result<(String, String)>;
}

/// [`CallMonitor`] over the MCE service on the system bus.
pub struct MceCallMonitor {
    connection: Connection,
}

impl MceCallMonitor {
    /// Query call state through `connection`.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CallMonitor for MceCallMonitor {
    async fn call_in_progress(&self) -> bool {
        let state = async {
            let proxy = MceRequestProxy::new(&self.connection).await?;
            proxy.get_call_state().await
        }
        .await;
        match state {
            Ok((state, _call_type)) => {
                state == CALL_STATE_ACTIVE || state == CALL_STATE_RINGING
            }
            Err(err) => {
                // Without MCE there is no call to protect.
                warn!("could not query call state: {err}");
                false
            }
        }
    }
}
