//! Frame snapshots taken during a run.

use zebracut_vision::Frame;

/// A snapshot could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("snapshot {label} not saved: {reason}")]
pub struct SnapshotError {
    /// Label the frame was saved under.
    pub label: String,
    /// What went wrong.
    pub reason: String,
}

/// Receives frames worth keeping, such as the view after each cut.
///
/// Implementations must not block for long; the automation worker calls
/// this between motion steps.
pub trait SnapshotSink: Send {
    /// Store `frame` under `label` (for example `"3_done"`).
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] if the frame could not be stored.
    /// Snapshot failures are logged and never stop a run.
    fn save(&mut self, frame: &Frame, label: &str) -> Result<(), SnapshotError>;
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn save(&mut self, _frame: &Frame, _label: &str) -> Result<(), SnapshotError> {
        Ok(())
    }
}
