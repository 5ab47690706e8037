// HTTP surface of the detector bridge

pub mod api;
pub mod server;

use crate::pipeline::registry::DetectorRegistry;
use crate::video::VideoOpener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared state handed to every handler.
pub struct AppState {
    pub registry: Arc<DetectorRegistry>,
    pub video_opener: Arc<dyn VideoOpener>,
    pub video_root: PathBuf,
    pub output_root: PathBuf,
}

impl AppState {
    /// Relative request paths are taken relative to the video root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.video_root.join(path)
        }
    }
}
