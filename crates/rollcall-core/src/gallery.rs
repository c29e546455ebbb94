//! Identity gallery: trained reference faces keyed by dense label.
//!
//! A [`Gallery`] is immutable. [`GalleryHandle`] publishes new versions by
//! swapping an `Arc` under a write lock, so identifications already holding
//! the previous version finish against a consistent snapshot.

use crate::frame;
use crate::provider::{DetectionProfile, FaceMatcher, FaceProvider, LabeledFace, Prediction, ProviderError};
use crate::store::Sample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub struct Gallery {
    version: u64,
    /// Dense label → roll number.
    labels: Vec<String>,
    matcher: Option<Box<dyn FaceMatcher>>,
}

impl std::fmt::Debug for Gallery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gallery")
            .field("version", &self.version)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

/// Counters from one rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub profiles: usize,
    pub skipped: usize,
}

impl Gallery {
    pub fn empty() -> Self {
        Self {
            version: 0,
            labels: Vec::new(),
            matcher: None,
        }
    }

    /// Derive one training face per sample and train a fresh matcher.
    ///
    /// Samples that fail to decode or contain no face are skipped. When a
    /// sample has several faces, the first in detector order is used.
    pub fn build(
        provider: &dyn FaceProvider,
        samples: &[Sample],
        version: u64,
    ) -> Result<(Self, RebuildStats), ProviderError> {
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));

        let size = provider.face_size();
        let mut labels = Vec::new();
        let mut faces = Vec::new();
        let mut stats = RebuildStats::default();

        for sample in ordered {
            match training_face(provider, sample, size) {
                Some(face) => {
                    faces.push(LabeledFace {
                        label: labels.len() as u32,
                        face,
                    });
                    labels.push(sample.roll_no.clone());
                }
                None => stats.skipped += 1,
            }
        }
        stats.profiles = faces.len();

        let matcher = if faces.is_empty() {
            None
        } else {
            Some(provider.train(&faces)?)
        };

        Ok((
            Self {
                version,
                labels,
                matcher,
            },
            stats,
        ))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn profiles(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn lookup(&self, label: u32) -> Option<&str> {
        self.labels.get(label as usize).map(String::as_str)
    }

    /// Nearest profile for a normalized face; `None` on an empty gallery.
    pub fn predict(&self, face: &image::GrayImage) -> Result<Option<Prediction>, ProviderError> {
        match &self.matcher {
            Some(m) => m.predict(face),
            None => Ok(None),
        }
    }
}

fn training_face(provider: &dyn FaceProvider, sample: &Sample, size: u32) -> Option<image::GrayImage> {
    let img = match frame::decode(&sample.bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(roll_no = %sample.roll_no, error = %e, "gallery: unreadable sample skipped");
            return None;
        }
    };
    let faces = match provider.detect_faces(&img, DetectionProfile::Enrollment) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(roll_no = %sample.roll_no, error = %e, "gallery: detection failed, sample skipped");
            return None;
        }
    };
    let Some(region) = faces.first() else {
        tracing::warn!(roll_no = %sample.roll_no, "gallery: no face in sample, skipped");
        return None;
    };
    if faces.len() > 1 {
        tracing::debug!(roll_no = %sample.roll_no, faces = faces.len(), "gallery: using first detected face");
    }
    frame::crop(&img, region)
        .map(|face| frame::normalize(&face, size))
        .ok()
}

/// Owner of the published gallery version.
pub struct GalleryHandle {
    current: RwLock<Arc<Gallery>>,
    next_version: AtomicU64,
}

impl Default for GalleryHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl GalleryHandle {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Gallery::empty())),
            next_version: AtomicU64::new(1),
        }
    }

    /// Snapshot of the published gallery.
    pub fn current(&self) -> Arc<Gallery> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a new version from `samples` and publish it.
    ///
    /// On a training failure the previous version stays published.
    pub fn rebuild(
        &self,
        provider: &dyn FaceProvider,
        samples: &[Sample],
    ) -> Result<Arc<Gallery>, ProviderError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let (gallery, stats) = Gallery::build(provider, samples, version)?;
        let gallery = Arc::new(gallery);

        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // A slower concurrent rebuild must not overwrite a newer one.
        if slot.version < version {
            *slot = gallery.clone();
        }
        drop(slot);

        tracing::info!(
            profiles = stats.profiles,
            skipped = stats.skipped,
            version,
            "gallery rebuilt"
        );
        Ok(gallery)
    }
}
