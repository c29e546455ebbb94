//! ArcFace embeddings via ONNX Runtime.
//!
//! Takes a square 112×112 grayscale face crop and returns an L2-normalized
//! 512-dimensional embedding.

use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is {0}x{1}, expected {INPUT_SIZE}x{INPUT_SIZE}")]
    WrongCropSize(u32, u32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity in [-1, 1]; 0 when either vector is zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
        for (a, b) in self.0.iter().zip(&other.0) {
            dot += a * b;
            na += a * a;
            nb += b * b;
        }
        let denom = na.sqrt() * nb.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    pub fn embed(&mut self, face: &GrayImage) -> Result<Embedding, RecognizerError> {
        if face.dimensions() != (INPUT_SIZE, INPUT_SIZE) {
            return Err(RecognizerError::WrongCropSize(face.width(), face.height()));
        }
        let input = to_tensor(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(l2_normalize(raw))
    }
}

fn to_tensor(face: &GrayImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        (face.get_pixel(x as u32, y as u32)[0] as f32 - PIXEL_MEAN) / PIXEL_STD
    })
}

fn l2_normalize(raw: &[f32]) -> Embedding {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        Embedding(raw.iter().map(|v| v / norm).collect())
    } else {
        Embedding(raw.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical_and_orthogonal() {
        let a = Embedding(vec![1.0, 0.0]);
        let b = Embedding(vec![0.0, 2.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding(vec![0.0, 0.0]);
        assert_eq!(a.similarity(&Embedding(vec![1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let e = l2_normalize(&[3.0, 4.0]);
        assert_eq!(e.0, vec![0.6, 0.8]);
    }

    #[test]
    fn test_tensor_channels_replicated() {
        let face = GrayImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Luma([100]));
        let t = to_tensor(&face);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        let expected = (100.0 - PIXEL_MEAN) / PIXEL_STD;
        assert_eq!(t[[0, 0, 5, 7]], expected);
        assert_eq!(t[[0, 2, 5, 7]], expected);
    }
}
