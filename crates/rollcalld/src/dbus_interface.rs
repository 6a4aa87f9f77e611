use crate::frame_loop::{Annotation, LoopHandle};
use tokio::sync::watch;
use zbus::interface;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every method forwards to the frame loop task over its command channel;
/// nothing here touches session state directly.
pub struct AttendanceService {
    pub handle: LoopHandle,
    pub annotations: watch::Receiver<Vec<Annotation>>,
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Return daemon status as a JSON string.
    async fn status(&self) -> zbus::fdo::Result<String> {
        self.handle.status().await.map_err(zbus::fdo::Error::Failed)
    }

    /// Current overlay annotations (box + label per face) as JSON, for
    /// UI layers that render on top of the video feed.
    async fn annotations(&self) -> zbus::fdo::Result<String> {
        let annotations = self.annotations.borrow().clone();
        serde_json::to_string(&annotations)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Roster names not yet marked present, in roster order.
    async fn absent(&self) -> zbus::fdo::Result<Vec<String>> {
        self.handle
            .list_absent()
            .await
            .map_err(zbus::fdo::Error::Failed)
    }

    /// Human-readable attendance report (present with times, then absent).
    async fn report(&self) -> zbus::fdo::Result<String> {
        self.handle
            .export_report()
            .await
            .map_err(zbus::fdo::Error::Failed)
    }

    /// Empty the attendance ledger.
    async fn clear(&self) -> zbus::fdo::Result<()> {
        tracing::info!("clear requested");
        self.handle
            .clear_attendance()
            .await
            .map_err(zbus::fdo::Error::Failed)
    }

    /// Name the pending unknown-face capture and store it in the roster.
    /// Fails when the name is empty or no capture is awaiting input.
    async fn submit_enrollment(&self, name: &str) -> zbus::fdo::Result<()> {
        tracing::info!(name, "enrollment submit requested");
        self.handle
            .submit_enrollment(name.to_string())
            .await
            .map_err(zbus::fdo::Error::Failed)
    }

    /// Discard the pending capture. Returns false when there was nothing
    /// to cancel.
    async fn cancel_enrollment(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("enrollment cancel requested");
        self.handle
            .cancel_enrollment()
            .await
            .map_err(zbus::fdo::Error::Failed)
    }
}
