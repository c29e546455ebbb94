//! Face capability seam.
//!
//! Detection, eye localisation, and matching are consumed through these
//! traits; the core never looks at how a provider does them.

use crate::types::Rect;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("matching failed: {0}")]
    Matching(String),
    #[error("training failed: {0}")]
    Training(String),
}

/// Detector tuning. Both profiles favour recall over precision; wrong
/// identities are rejected later by the acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionProfile {
    /// Gallery rebuild over enrollment photos: the most permissive settings.
    Enrollment,
    /// Stream frames and registration candidates.
    Live,
}

/// A normalized face crop with the dense label it trains under.
#[derive(Debug, Clone)]
pub struct LabeledFace {
    pub label: u32,
    pub face: GrayImage,
}

/// Nearest gallery label for a probe face. Lower score = closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    pub score: f32,
}

pub trait FaceProvider: Send + Sync {
    /// Faces in detector output order.
    fn detect_faces(
        &self,
        frame: &GrayImage,
        profile: DetectionProfile,
    ) -> Result<Vec<Rect>, ProviderError>;

    /// Eye regions inside a face crop, relative to the crop.
    fn detect_eyes(&self, face: &GrayImage) -> Result<Vec<Rect>, ProviderError>;

    /// Side length of the square crops passed to `train` and `predict`.
    fn face_size(&self) -> u32 {
        200
    }

    /// Build a fresh matcher. Never mutates previously returned matchers.
    fn train(&self, faces: &[LabeledFace]) -> Result<Box<dyn FaceMatcher>, ProviderError>;
}

/// A trained, immutable matching model.
pub trait FaceMatcher: Send + Sync {
    /// `None` when the model has nothing to compare against.
    fn predict(&self, face: &GrayImage) -> Result<Option<Prediction>, ProviderError>;
}
