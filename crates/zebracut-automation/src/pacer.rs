//! Open-loop waits after motion commands.
//!
//! The stages report completion before the mechanics have fully settled,
//! so every move is followed by a sleep proportional to the distance
//! travelled. Waits go through [`Pacer`] so tests can record them instead
//! of sleeping.

use std::time::Duration;

/// Blocks the calling thread for a settle or development wait.
pub trait Pacer: Send + Sync {
    /// Wait for `duration`.
    fn wait(&self, duration: Duration);
}

/// [`Pacer`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn wait(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Time to let an axis settle after travelling `distance` at `speed`:
/// `|distance| / speed * multiplier`.
///
/// Non-finite or non-positive inputs give a zero wait.
#[must_use]
pub fn settle_time(distance: f64, speed: f64, multiplier: f64) -> Duration {
    let secs = distance.abs() / speed * multiplier;
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}
