//! Mutable state of one automation run.
//!
//! The abort flag and the annotation board are the only pieces shared
//! with other threads; everything else is owned by the controller and
//! passed by reference into each state-machine step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use zebracut_vision::Keypoint;

use crate::events::EventSender;
use crate::grid::GridPosition;
use crate::pacer::Pacer;

/// Cross-thread stop request.
///
/// Cloning shares the same flag. Once set it stays set for the run.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// A fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop at the next boundary.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Side channels every motion step needs: waits, events and the stop
/// flag.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    /// Settle and development waits.
    pub pacer: &'a dyn Pacer,
    /// Progress reporting.
    pub events: &'a EventSender,
    /// Stop request, checked before every command.
    pub abort: &'a AbortHandle,
}

/// Keypoints currently drawn over the live view.
///
/// The list is replaced whole; readers always see a complete list.
#[derive(Debug, Clone)]
pub struct AnnotationBoard {
    points: Arc<RwLock<Arc<[Keypoint]>>>,
}

impl Default for AnnotationBoard {
    fn default() -> Self {
        Self {
            points: Arc::new(RwLock::new(Arc::from(Vec::new()))),
        }
    }
}

impl AnnotationBoard {
    /// An empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list and return the shared copy that was stored.
    pub fn replace(&self, points: Vec<Keypoint>) -> Arc<[Keypoint]> {
        let points: Arc<[Keypoint]> = Arc::from(points);
        *self.points.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&points);
        points
    }

    /// Remove every annotation.
    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// The current list.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Keypoint]> {
        Arc::clone(&self.points.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Everything the controller mutates while walking the grid.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Cell currently under the camera.
    pub position: GridPosition,
    /// Stop request shared with the operator.
    pub abort: AbortHandle,
    /// Specimens visited so far (0-based index of the current one).
    pub counter: usize,
    /// Live-view annotations.
    pub annotations: AnnotationBoard,
    /// `(target, tool)` pairs that were used to position the stage.
    pub history: Vec<(Keypoint, Keypoint)>,
}

impl RunState {
    /// Fresh state at the first cell, sharing `abort` and `annotations`
    /// with the caller.
    #[must_use]
    pub fn new(abort: AbortHandle, annotations: AnnotationBoard) -> Self {
        Self {
            abort,
            annotations,
            ..Self::default()
        }
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use zebracut_vision::KeypointTag;

    #[test]
    fn abort_is_shared_between_clones() {
        let handle = AbortHandle::new();
        let state = RunState::new(handle.clone(), AnnotationBoard::new());
        assert!(!state.aborted());
        handle.abort();
        assert!(state.aborted());
    }

    #[test]
    fn abort_is_visible_across_threads() {
        let handle = AbortHandle::new();
        let remote = handle.clone();
        std::thread::spawn(move || remote.abort()).join().unwrap();
        assert!(handle.is_aborted());
    }

    #[test]
    fn board_replaces_whole_list() {
        let board = AnnotationBoard::new();
        let reader = board.clone();
        board.replace(vec![
            Keypoint::new(1, 2, KeypointTag::Target),
            Keypoint::new(3, 4, KeypointTag::Tool),
        ]);
        let before = reader.snapshot();
        assert_eq!(before.len(), 2);

        board.clear();
        assert!(reader.snapshot().is_empty());
        // Earlier snapshots are unaffected by later replacement.
        assert_eq!(before.len(), 2);
    }
}
