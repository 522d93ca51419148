//! PNG files on disk for run snapshots and locator traces.

use std::path::{Path, PathBuf};

use zebracut_automation::{SnapshotError, SnapshotSink};
use zebracut_vision::{Frame, StageImage};

/// Writes each snapshot to `<dir>/<label>.png`.
#[derive(Debug, Clone)]
pub struct PngDirectorySink {
    dir: PathBuf,
}

impl PngDirectorySink {
    /// Sink writing into `dir`, which is created if missing.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if `dir` cannot be created.
    pub fn create(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.png"))
    }
}

impl SnapshotSink for PngDirectorySink {
    fn save(&mut self, frame: &Frame, label: &str) -> Result<(), SnapshotError> {
        let path = self.path_for(label);
        frame.image().save(&path).map_err(|e| SnapshotError {
            label: label.to_owned(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "snapshot written");
        Ok(())
    }
}

/// Write intermediate rasters as `<dir>/<prefix>_<nn>_<stage>.png`.
///
/// # Errors
///
/// Returns the first write failure.
pub fn write_trace(dir: &Path, prefix: &str, stages: &[StageImage]) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dir)?;
    for (i, stage) in stages.iter().enumerate() {
        let path = dir.join(format!("{prefix}_{i:02}_{}.png", stage.name));
        stage.image.save(&path)?;
    }
    Ok(stages.len())
}
