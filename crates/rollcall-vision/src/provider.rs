//! [`FaceProvider`] backed by SCRFD detection and ArcFace embeddings.

use crate::detector::{Detection, DetectorError, FaceDetector};
use crate::recognizer::{Embedding, FaceRecognizer, RecognizerError, INPUT_SIZE};
use image::GrayImage;
use rollcall_core::{
    DetectionProfile, FaceMatcher, FaceProvider, LabeledFace, Prediction, ProviderError, Rect,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Minimum SCRFD score per profile.
const LIVE_CONFIDENCE: f32 = 0.5;
const ENROLLMENT_CONFIDENCE: f32 = 0.35;
/// Minimum face side in pixels per profile.
const LIVE_MIN_FACE: f32 = 50.0;
const ENROLLMENT_MIN_FACE: f32 = 60.0;
/// Eye box side as a fraction of face width.
const EYE_BOX_RATIO: f32 = 0.25;
/// Cosine similarity → distance: `(1 - similarity) * DISTANCE_SCALE`.
const DISTANCE_SCALE: f32 = 100.0;

pub struct OnnxProvider {
    detector: Mutex<FaceDetector>,
    recognizer: Arc<Mutex<FaceRecognizer>>,
}

impl OnnxProvider {
    pub fn load(detector_model: &Path, recognizer_model: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(detector_model).map_err(detection_err)?;
        let recognizer = FaceRecognizer::load(recognizer_model).map_err(matching_err)?;
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Arc::new(Mutex::new(recognizer)),
        })
    }

    fn detect(&self, img: &GrayImage, threshold: f32) -> Result<Vec<Detection>, ProviderError> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| ProviderError::Detection("detector lock poisoned".into()))?;
        detector.detect(img, threshold).map_err(detection_err)
    }
}

fn detection_err(e: DetectorError) -> ProviderError {
    ProviderError::Detection(e.to_string())
}

fn matching_err(e: RecognizerError) -> ProviderError {
    ProviderError::Matching(e.to_string())
}

/// Round a float box to whole pixels, dropping the part left of / above the frame.
fn to_rect(x: f32, y: f32, width: f32, height: f32) -> Option<Rect> {
    let x0 = x.max(0.0).round();
    let y0 = y.max(0.0).round();
    let x1 = (x + width).round();
    let y1 = (y + height).round();
    (x1 > x0 && y1 > y0).then(|| Rect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Square boxes around the eye landmarks.
fn eye_boxes(face: &Detection) -> Vec<Rect> {
    let Some(landmarks) = face.landmarks else {
        return Vec::new();
    };
    let side = face.width * EYE_BOX_RATIO;
    landmarks[..2]
        .iter()
        .filter_map(|&(cx, cy)| to_rect(cx - side / 2.0, cy - side / 2.0, side, side))
        .collect()
}

fn embed(recognizer: &Mutex<FaceRecognizer>, face: &GrayImage) -> Result<Embedding, ProviderError> {
    recognizer
        .lock()
        .map_err(|_| ProviderError::Matching("recognizer lock poisoned".into()))?
        .embed(face)
        .map_err(matching_err)
}

impl FaceProvider for OnnxProvider {
    fn detect_faces(
        &self,
        frame: &GrayImage,
        profile: DetectionProfile,
    ) -> Result<Vec<Rect>, ProviderError> {
        let (threshold, min_side) = match profile {
            DetectionProfile::Live => (LIVE_CONFIDENCE, LIVE_MIN_FACE),
            DetectionProfile::Enrollment => (ENROLLMENT_CONFIDENCE, ENROLLMENT_MIN_FACE),
        };
        Ok(self
            .detect(frame, threshold)?
            .iter()
            .filter(|d| d.width >= min_side && d.height >= min_side)
            .filter_map(|d| to_rect(d.x, d.y, d.width, d.height))
            .collect())
    }

    /// Re-detects inside a padded copy of the crop and boxes the eye landmarks.
    fn detect_eyes(&self, face: &GrayImage) -> Result<Vec<Rect>, ProviderError> {
        let (w, h) = face.dimensions();
        let (pad_x, pad_y) = (w / 2, h / 2);
        let mut canvas = GrayImage::new(w + 2 * pad_x, h + 2 * pad_y);
        image::imageops::replace(&mut canvas, face, pad_x as i64, pad_y as i64);

        let detections = self.detect(&canvas, ENROLLMENT_CONFIDENCE)?;
        let Some(best) = detections.first() else {
            return Ok(Vec::new());
        };
        let crop = Rect::new(pad_x, pad_y, w, h);
        Ok(eye_boxes(best)
            .into_iter()
            .filter_map(|eye| {
                let inside = Rect::new(
                    eye.x.max(crop.x),
                    eye.y.max(crop.y),
                    eye.right().min(crop.right()).saturating_sub(eye.x.max(crop.x)),
                    eye.bottom().min(crop.bottom()).saturating_sub(eye.y.max(crop.y)),
                );
                (!inside.is_empty()).then(|| Rect::new(inside.x - pad_x, inside.y - pad_y, inside.width, inside.height))
            })
            .collect())
    }

    fn face_size(&self) -> u32 {
        INPUT_SIZE
    }

    fn train(&self, faces: &[LabeledFace]) -> Result<Box<dyn FaceMatcher>, ProviderError> {
        let profiles = faces
            .iter()
            .map(|f| Ok((f.label, embed(&self.recognizer, &f.face)?)))
            .collect::<Result<Vec<_>, ProviderError>>()
            .map_err(|e| ProviderError::Training(e.to_string()))?;
        Ok(Box::new(EmbeddingMatcher {
            recognizer: self.recognizer.clone(),
            profiles,
        }))
    }
}

/// Nearest-embedding matcher. Scores are cosine distances scaled to 0..200.
struct EmbeddingMatcher {
    recognizer: Arc<Mutex<FaceRecognizer>>,
    profiles: Vec<(u32, Embedding)>,
}

impl FaceMatcher for EmbeddingMatcher {
    fn predict(&self, face: &GrayImage) -> Result<Option<Prediction>, ProviderError> {
        if self.profiles.is_empty() {
            return Ok(None);
        }
        let probe = embed(&self.recognizer, face)?;
        Ok(nearest(&probe, &self.profiles))
    }
}

/// Best profile by cosine similarity; every profile is compared.
fn nearest(probe: &Embedding, profiles: &[(u32, Embedding)]) -> Option<Prediction> {
    profiles
        .iter()
        .map(|(label, e)| Prediction {
            label: *label,
            score: (1.0 - probe.similarity(e)) * DISTANCE_SCALE,
        })
        .min_by(|a, b| a.score.total_cmp(&b.score))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rect_clips_negative_origin() {
        assert_eq!(to_rect(-10.0, 5.4, 50.0, 20.0), Some(Rect::new(0, 5, 40, 20)));
        assert_eq!(to_rect(-60.0, 0.0, 50.0, 20.0), None);
    }

    #[test]
    fn test_eye_boxes_centered_on_landmarks() {
        let face = Detection {
            x: 0.0,
            y: 0.0,
            width: 80.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: Some([(20.0, 30.0), (60.0, 30.0), (40.0, 50.0), (25.0, 70.0), (55.0, 70.0)]),
        };
        let eyes = eye_boxes(&face);
        assert_eq!(eyes, vec![Rect::new(10, 20, 20, 20), Rect::new(50, 20, 20, 20)]);
    }

    #[test]
    fn test_eye_boxes_without_landmarks() {
        let face = Detection {
            x: 0.0,
            y: 0.0,
            width: 80.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert!(eye_boxes(&face).is_empty());
    }

    #[test]
    fn test_nearest_scores_cosine_distance() {
        let profiles = vec![
            (0, Embedding(vec![0.0, 1.0])),
            (1, Embedding(vec![1.0, 0.0])),
        ];
        let p = nearest(&Embedding(vec![1.0, 0.0]), &profiles).unwrap();
        assert_eq!(p.label, 1);
        assert!(p.score.abs() < 1e-4);

        let orthogonal = nearest(&Embedding(vec![0.0, -1.0]), &profiles[1..]).unwrap();
        assert!((orthogonal.score - DISTANCE_SCALE).abs() < 1e-4);
    }

    #[test]
    fn test_nearest_empty() {
        assert!(nearest(&Embedding(vec![1.0]), &[]).is_none());
    }
}
