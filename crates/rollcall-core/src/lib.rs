//! rollcall-core: Face identification and once-per-day attendance logging.
//!
//! Face detection and matching are consumed through [`provider::FaceProvider`];
//! this crate turns their per-frame, probabilistic output into deduplicated,
//! auditable attendance records.

pub mod frame;
pub mod gallery;
pub mod guard;
pub mod identifier;
pub mod ledger;
pub mod provider;
pub mod registry;
pub mod samples;
pub mod sqlite;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use gallery::{Gallery, GalleryHandle};
pub use guard::RegistrationGuard;
pub use identifier::{Identifier, IdentifierConfig};
pub use ledger::{AttendanceLedger, Clock, LedgerError, LocalClock};
pub use provider::{DetectionProfile, FaceMatcher, FaceProvider, LabeledFace, Prediction, ProviderError};
pub use registry::{RegisterOutcome, Registrar, RegistrarConfig, RegistryError};
pub use samples::SampleDir;
pub use sqlite::SqliteStore;
pub use store::{AttendanceStore, IdentityStore, Sample, SampleStore, StoreError};
pub use types::{AttendanceRecord, DetectionResult, Identity, LogStatus, Rect, StatusHint};
