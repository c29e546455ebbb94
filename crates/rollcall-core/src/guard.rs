//! Biometric conflict check run before enrolling a new reference image.

use crate::identifier::Identifier;
use image::GrayImage;
use std::sync::Arc;

/// What the current gallery sees in a candidate image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screening {
    /// Faces detected in the candidate.
    pub faces: usize,
    /// Enrolled roll numbers matched, in detector order, without repeats.
    pub matches: Vec<String>,
}

impl Screening {
    /// First match belonging to someone other than `roll_no`.
    pub fn conflict_for(&self, roll_no: &str) -> Option<&str> {
        self.matches.iter().map(String::as_str).find(|m| *m != roll_no)
    }
}

pub struct RegistrationGuard {
    identifier: Arc<Identifier>,
}

impl RegistrationGuard {
    pub fn new(identifier: Arc<Identifier>) -> Self {
        Self { identifier }
    }

    /// Run identification on the candidate against the current gallery.
    pub fn screen(&self, candidate: &GrayImage) -> Screening {
        let results = self.identifier.identify(candidate);
        let mut matches: Vec<String> = Vec::new();
        for roll in results.iter().filter_map(|r| r.roll_no.as_ref()) {
            if !matches.contains(roll) {
                matches.push(roll.clone());
            }
        }
        Screening {
            faces: results.len(),
            matches,
        }
    }

    /// The enrolled identity the candidate's face already belongs to, if any.
    ///
    /// A candidate with no detectable face raises no conflict.
    pub fn check_conflict(&self, candidate: &GrayImage) -> Option<String> {
        self.screen(candidate).matches.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryHandle;
    use crate::identifier::IdentifierConfig;
    use crate::store::Sample;
    use crate::testing::{blank_tile, encode, face_tile, frame_of, FakeProvider};

    fn guard(enrolled: &[(&str, u8)]) -> RegistrationGuard {
        let provider = Arc::new(FakeProvider::new());
        let gallery = Arc::new(GalleryHandle::new());
        let samples: Vec<Sample> = enrolled
            .iter()
            .map(|(roll, tone)| Sample {
                roll_no: roll.to_string(),
                bytes: encode(&face_tile(*tone, true, 32)),
            })
            .collect();
        gallery.rebuild(provider.as_ref(), &samples).unwrap();
        RegistrationGuard::new(Arc::new(Identifier::new(
            provider,
            gallery,
            IdentifierConfig::default(),
        )))
    }

    #[test]
    fn test_enrolled_face_conflicts() {
        let g = guard(&[("R100", 100), ("R200", 220)]);
        assert_eq!(g.check_conflict(&face_tile(100, true, 32)).as_deref(), Some("R100"));
    }

    #[test]
    fn test_new_face_passes() {
        let g = guard(&[("R100", 10)]);
        assert_eq!(g.check_conflict(&face_tile(200, true, 32)), None);
    }

    #[test]
    fn test_faceless_candidate_passes() {
        let g = guard(&[("R100", 100)]);
        let s = g.screen(&blank_tile(32));
        assert_eq!(s.faces, 0);
        assert_eq!(g.check_conflict(&blank_tile(32)), None);
    }

    #[test]
    fn test_empty_gallery_never_conflicts() {
        let g = guard(&[]);
        assert_eq!(g.check_conflict(&face_tile(100, true, 32)), None);
    }

    #[test]
    fn test_screening_excludes_own_key() {
        let g = guard(&[("R100", 100), ("R200", 220)]);
        let photo = frame_of(&[face_tile(100, true, 32), face_tile(220, true, 32)]);
        let s = g.screen(&photo);
        assert_eq!(s.faces, 2);
        assert_eq!(s.matches, vec!["R100", "R200"]);
        assert_eq!(s.conflict_for("R100"), Some("R200"));
        assert_eq!(s.conflict_for("R300"), Some("R100"));
    }
}
