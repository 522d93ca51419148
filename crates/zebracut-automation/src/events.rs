//! Progress events from the automation worker to the presentation layer.
//!
//! Events flow one way through an unbounded channel. Sending never
//! blocks, and a receiver that has gone away is ignored so a closed
//! display never stalls or aborts a run.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use zebracut_vision::Keypoint;

use crate::devices::AxisId;

/// Something the operator display may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    /// An axis reached a new position.
    Position {
        /// Axis that moved.
        axis: AxisId,
        /// Position read back after the move.
        position: f64,
    },
    /// Progress message.
    Info(String),
    /// Specimen-level failure message.
    Error(String),
    /// The keypoint pair about to be used for motion.
    Keypoints {
        /// Anatomical target.
        target: Keypoint,
        /// Scissor tip.
        tool: Keypoint,
    },
    /// The full annotation list for the displayed frame. Empty clears.
    Annotations(Arc<[Keypoint]>),
    /// Every specimen has been visited.
    Finished,
    /// The run stopped early on operator request.
    Aborted,
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<Sender<AutomationEvent>>,
}

impl EventSender {
    /// A sender that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish `event` without blocking.
    pub fn emit(&self, event: AutomationEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            tracing::trace!("event receiver disconnected");
        }
    }

    /// Publish a progress message, also logged at `info`.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.emit(AutomationEvent::Info(message));
    }

    /// Publish a failure message, also logged at `warn`.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.emit(AutomationEvent::Error(message));
    }

    /// Publish an axis position.
    pub fn position(&self, axis: AxisId, position: f64) {
        self.emit(AutomationEvent::Position { axis, position });
    }
}

/// Create a connected sender/receiver pair.
#[must_use]
pub fn channel() -> (EventSender, Receiver<AutomationEvent>) {
    let (tx, rx) = unbounded();
    (EventSender { tx: Some(tx) }, rx)
}
