//! Deterministic face provider for tests.
//!
//! A frame is a row of square tiles, each `height` pixels wide. Any tile with
//! a non-black pixel is a face. A pixel of value 255 inside a face is an eye.
//! Matching is the mean absolute pixel difference against every trained
//! crop, so a face matches its own enrollment tile with score 0.

use crate::frame;
use crate::provider::{
    DetectionProfile, FaceMatcher, FaceProvider, LabeledFace, Prediction, ProviderError,
};
use crate::types::Rect;
use image::{GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const EYE: u8 = 255;

#[derive(Default)]
pub struct FakeProvider {
    fail_detection: AtomicBool,
    fail_training: AtomicBool,
    trainings: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `detect_faces` call fail.
    pub fn fail_detection(&self, fail: bool) {
        self.fail_detection.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `train` call fail.
    pub fn fail_training(&self, fail: bool) {
        self.fail_training.store(fail, Ordering::SeqCst);
    }

    /// Number of times `train` has been called.
    pub fn trainings(&self) -> usize {
        self.trainings.load(Ordering::SeqCst)
    }
}

impl FaceProvider for FakeProvider {
    fn detect_faces(
        &self,
        frame: &GrayImage,
        _profile: DetectionProfile,
    ) -> Result<Vec<Rect>, ProviderError> {
        if self.fail_detection.load(Ordering::SeqCst) {
            return Err(ProviderError::Detection("scripted failure".into()));
        }
        let side = frame.height();
        if side == 0 {
            return Ok(Vec::new());
        }
        let tiles = frame.width() / side;
        let faces = (0..tiles)
            .map(|i| Rect::new(i * side, 0, side, side))
            .filter(|r| {
                (r.x..r.right()).any(|x| (0..side).any(|y| frame.get_pixel(x, y)[0] != 0))
            })
            .collect();
        Ok(faces)
    }

    fn detect_eyes(&self, face: &GrayImage) -> Result<Vec<Rect>, ProviderError> {
        Ok(face
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] == EYE)
            .map(|(x, y, _)| Rect::new(x, y, 1, 1))
            .collect())
    }

    fn face_size(&self) -> u32 {
        16
    }

    fn train(&self, faces: &[LabeledFace]) -> Result<Box<dyn FaceMatcher>, ProviderError> {
        self.trainings.fetch_add(1, Ordering::SeqCst);
        if self.fail_training.load(Ordering::SeqCst) {
            return Err(ProviderError::Training("scripted failure".into()));
        }
        Ok(Box::new(FakeMatcher {
            profiles: faces.to_vec(),
        }))
    }
}

struct FakeMatcher {
    profiles: Vec<LabeledFace>,
}

impl FaceMatcher for FakeMatcher {
    fn predict(&self, face: &GrayImage) -> Result<Option<Prediction>, ProviderError> {
        let best = self
            .profiles
            .iter()
            .map(|p| Prediction {
                label: p.label,
                score: mean_abs_diff(face, &p.face),
            })
            .min_by(|a, b| a.score.total_cmp(&b.score));
        Ok(best)
    }
}

fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f32 {
    let b = frame::normalize(b, a.width());
    let total: f32 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| (pa[0] as f32 - pb[0] as f32).abs())
        .sum();
    total / (a.width() * a.height()).max(1) as f32
}

/// A square face tile of uniform `tone`, optionally with two eye pixels.
pub fn face_tile(tone: u8, eyes: bool, side: u32) -> GrayImage {
    let mut tile = GrayImage::from_pixel(side, side, Luma([tone]));
    if eyes {
        tile.put_pixel(side / 4, side / 4, Luma([EYE]));
        tile.put_pixel(3 * side / 4, side / 4, Luma([EYE]));
    }
    tile
}

/// A black tile: no face.
pub fn blank_tile(side: u32) -> GrayImage {
    GrayImage::new(side, side)
}

/// Lay tiles out left to right. All tiles must share the same height.
pub fn frame_of(tiles: &[GrayImage]) -> GrayImage {
    let side = tiles.first().map(|t| t.height()).unwrap_or(0);
    let mut out = GrayImage::new(side * tiles.len() as u32, side);
    for (i, tile) in tiles.iter().enumerate() {
        image::imageops::replace(&mut out, tile, (i as u32 * side) as i64, 0);
    }
    out
}

/// PNG-encode a grayscale image.
pub fn encode(img: &GrayImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("PNG encoding into memory cannot fail");
    buf.into_inner()
}
