//! rollcall-vision: ONNX face provider for rollcall.
//!
//! SCRFD finds faces and their five landmarks; ArcFace embeds normalized
//! crops, which are matched by cosine distance.

pub mod detector;
pub mod provider;
pub mod recognizer;

pub use provider::OnnxProvider;

use std::path::PathBuf;

/// SCRFD detection model file name.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
