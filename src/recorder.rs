use std::fs;
use std::path::{Path, PathBuf};
use log::{info, warn};
use crate::drivers::MonitorError;

/// Writes one PNG per refresh while recording is on.
#[derive(Default)]
pub struct FrameRecorder {
    target: Option<PathBuf>,
    frames: Vec<PathBuf>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, dir: &Path) -> Result<(), MonitorError> {
        fs::create_dir_all(dir)?;
        self.frames.clear();
        self.target = Some(dir.to_path_buf());
        info!("recording frames into {}", dir.display());
        Ok(())
    }

    /// Stops recording and returns how many frames were kept.
    pub fn stop(&mut self) -> usize {
        if let Some(dir) = self.target.take() {
            info!("recording saved: {} frames in {}", self.frames.len(), dir.display());
        }
        self.frames.len()
    }

    /// Stops recording and deletes every frame written since `start`.
    pub fn cancel(&mut self) -> Result<usize, MonitorError> {
        self.target = None;
        let removed = self.frames.len();
        for frame in self.frames.drain(..) {
            if let Err(err) = fs::remove_file(&frame) {
                warn!("could not remove {}: {err}", frame.display());
            }
        }
        Ok(removed)
    }

    pub fn write_frame(&mut self, png: &[u8]) -> Result<(), MonitorError> {
        if let Some(dir) = &self.target {
            let path = dir.join(format!("img{}.png", self.frames.len()));
            fs::write(&path, png)?;
            self.frames.push(path);
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.target.is_some()
    }
}
