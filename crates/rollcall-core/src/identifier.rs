//! Per-frame identification.
//!
//! Maps a frame to one [`DetectionResult`] per detected face. Pure: never
//! touches the ledger or the gallery, and never fails. Frames that cannot
//! be decoded or processed yield an empty result.

use crate::frame;
use crate::gallery::{Gallery, GalleryHandle};
use crate::provider::{DetectionProfile, FaceProvider};
use crate::types::{DetectionResult, Rect, StatusHint};
use image::GrayImage;
use std::sync::Arc;

/// Default acceptance threshold on the provider's distance score.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 80.0;

#[derive(Debug, Clone, Copy)]
pub struct IdentifierConfig {
    /// A match is accepted only when its score is strictly below this value.
    pub acceptance_threshold: f32,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
        }
    }
}

pub struct Identifier {
    provider: Arc<dyn FaceProvider>,
    gallery: Arc<GalleryHandle>,
    config: IdentifierConfig,
}

impl Identifier {
    pub fn new(
        provider: Arc<dyn FaceProvider>,
        gallery: Arc<GalleryHandle>,
        config: IdentifierConfig,
    ) -> Self {
        Self {
            provider,
            gallery,
            config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn FaceProvider> {
        &self.provider
    }

    pub fn gallery(&self) -> &Arc<GalleryHandle> {
        &self.gallery
    }

    pub fn config(&self) -> &IdentifierConfig {
        &self.config
    }

    /// Decode and identify. Undecodable input is dropped.
    pub fn identify_encoded(&self, bytes: &[u8]) -> Vec<DetectionResult> {
        match frame::decode(bytes) {
            Ok(img) => self.identify(&img),
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "dropping undecodable frame");
                Vec::new()
            }
        }
    }

    pub fn identify(&self, img: &GrayImage) -> Vec<DetectionResult> {
        let faces = match self.provider.detect_faces(img, DetectionProfile::Live) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(error = %e, "dropping frame: detection failed");
                return Vec::new();
            }
        };

        // One snapshot per frame: a concurrent rebuild cannot change it mid-frame.
        let gallery = self.gallery.current();
        faces
            .iter()
            .filter_map(|region| self.identify_face(img, region, &gallery))
            .collect()
    }

    fn identify_face(&self, img: &GrayImage, region: &Rect, gallery: &Gallery) -> Option<DetectionResult> {
        // Detectors may report boxes overhanging the frame edge; everything
        // downstream uses the visible part.
        let Some(region) = region.clamp_to(img.width(), img.height()) else {
            tracing::debug!(?region, "skipping face outside frame");
            return None;
        };
        let face = match frame::crop(img, &region) {
            Ok(face) => face,
            Err(e) => {
                tracing::debug!(error = %e, "skipping face outside frame");
                return None;
            }
        };

        let eyes: Vec<Rect> = match self.provider.detect_eyes(&face) {
            Ok(eyes) => eyes.iter().map(|e| e.offset(&region)).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "eye detection failed");
                Vec::new()
            }
        };
        let has_eyes = !eyes.is_empty();
        let suggestion = if has_eyes {
            StatusHint::FaceLocated
        } else {
            StatusHint::Stabilizing
        };

        let mut roll_no = None;
        let mut score = None;
        if !gallery.is_empty() {
            let normalized = frame::normalize(&face, self.provider.face_size());
            match gallery.predict(&normalized) {
                Ok(Some(p)) => {
                    score = Some(p.score);
                    if p.score < self.config.acceptance_threshold {
                        roll_no = gallery.lookup(p.label).map(str::to_owned);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "matching failed; face left unknown"),
            }
        }

        Some(DetectionResult {
            roll_no,
            location: region.location(),
            eyes,
            has_eyes,
            suggestion,
            score,
        })
    }
}
