use crate::models::error::CaptureError;
use crate::models::state::CaptureState;

/// Event delegate for capture engine notifications.
///
/// `on_error` is called from the platform audio thread, not the controller
/// thread. Implementations should marshal to the UI thread if needed.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the engine state changes.
    fn on_state_changed(&self, state: CaptureState);

    /// Called when a packet write or buffer re-submit fails during capture.
    fn on_error(&self, error: &CaptureError);
}
