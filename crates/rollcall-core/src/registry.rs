//! Registration: validate, screen for biometric conflicts, persist, retrain.

use crate::frame;
use crate::gallery::Gallery;
use crate::guard::RegistrationGuard;
use crate::identifier::Identifier;
use crate::provider::ProviderError;
use crate::store::{IdentityStore, SampleStore, StoreError};
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("gallery rebuild: {0}")]
    Gallery(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered { roll_no: String, profiles: usize },
    /// The face already belongs to `existing`.
    Conflict { existing: String },
    InvalidImage { reason: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrarConfig {
    /// Refuse candidate images in which no face is detected.
    pub reject_faceless: bool,
}

pub struct Registrar {
    identifier: Arc<Identifier>,
    guard: RegistrationGuard,
    identities: Arc<dyn IdentityStore>,
    samples: Arc<dyn SampleStore>,
    config: RegistrarConfig,
    /// Serializes screen → persist → rebuild.
    lock: Mutex<()>,
}

impl Registrar {
    pub fn new(
        identifier: Arc<Identifier>,
        identities: Arc<dyn IdentityStore>,
        samples: Arc<dyn SampleStore>,
        config: RegistrarConfig,
    ) -> Self {
        Self {
            guard: RegistrationGuard::new(identifier.clone()),
            identifier,
            identities,
            samples,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Enroll `identity` with `image` as its reference sample.
    ///
    /// Re-registering an existing roll number replaces its metadata and
    /// sample, provided the face doesn't belong to someone else.
    pub fn register(&self, identity: Identity, image: &[u8]) -> Result<RegisterOutcome, RegistryError> {
        validate(&identity)?;

        let candidate = match frame::decode(image) {
            Ok(img) => img,
            Err(e) => {
                tracing::info!(roll_no = %identity.roll_no, error = %e, "registration refused: invalid image");
                return Ok(RegisterOutcome::InvalidImage {
                    reason: e.to_string(),
                });
            }
        };

        let _serial = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let screening = self.guard.screen(&candidate);
        if let Some(existing) = screening.conflict_for(&identity.roll_no) {
            tracing::warn!(
                roll_no = %identity.roll_no,
                existing,
                "registration refused: biometric conflict"
            );
            return Ok(RegisterOutcome::Conflict {
                existing: existing.to_string(),
            });
        }
        if screening.faces == 0 {
            if self.config.reject_faceless {
                tracing::info!(roll_no = %identity.roll_no, "registration refused: no face detected");
                return Ok(RegisterOutcome::InvalidImage {
                    reason: "no face detected".into(),
                });
            }
            tracing::warn!(
                roll_no = %identity.roll_no,
                "no face detected in reference image; conflict check skipped"
            );
        }

        let gallery = self.persist(&identity, image)?;

        tracing::info!(roll_no = %identity.roll_no, profiles = gallery.profiles(), "identity registered");
        Ok(RegisterOutcome::Registered {
            roll_no: identity.roll_no,
            profiles: gallery.profiles(),
        })
    }

    /// Write the identity and sample, then retrain. Either all three take
    /// effect or the stores are put back the way they were.
    fn persist(&self, identity: &Identity, image: &[u8]) -> Result<Arc<Gallery>, RegistryError> {
        let roll_no = identity.roll_no.as_str();
        let previous_identity = self.identities.get(roll_no)?;
        let previous_sample = self.samples.get(roll_no)?;

        self.identities.upsert(identity)?;
        if let Err(e) = self.samples.put(roll_no, image) {
            self.restore_identity(roll_no, previous_identity.as_ref());
            return Err(e.into());
        }
        match self.rebuild_locked() {
            Ok(gallery) => Ok(gallery),
            Err(e) => {
                tracing::warn!(roll_no, error = %e, "registration rolled back");
                self.restore_sample(roll_no, previous_sample.as_deref());
                self.restore_identity(roll_no, previous_identity.as_ref());
                Err(e)
            }
        }
    }

    fn restore_identity(&self, roll_no: &str, previous: Option<&Identity>) {
        let restored = match previous {
            Some(identity) => self.identities.upsert(identity),
            None => self.identities.remove(roll_no).map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!(roll_no, error = %e, "failed to restore identity after aborted registration");
        }
    }

    fn restore_sample(&self, roll_no: &str, previous: Option<&[u8]>) {
        let restored = match previous {
            Some(bytes) => self.samples.put(roll_no, bytes),
            None => self.samples.remove(roll_no),
        };
        if let Err(e) = restored {
            tracing::error!(roll_no, error = %e, "failed to restore face sample after aborted registration");
        }
    }

    /// Retrain the gallery from every stored sample.
    pub fn rebuild_gallery(&self) -> Result<Arc<Gallery>, RegistryError> {
        let _serial = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.rebuild_locked()
    }

    fn rebuild_locked(&self) -> Result<Arc<Gallery>, RegistryError> {
        let samples = self.samples.samples()?;
        let gallery = self
            .identifier
            .gallery()
            .rebuild(self.identifier.provider().as_ref(), &samples)?;
        Ok(gallery)
    }
}

fn validate(identity: &Identity) -> Result<(), RegistryError> {
    let key = &identity.roll_no;
    if key.trim().is_empty() {
        return Err(RegistryError::InvalidIdentity("roll number is empty".into()));
    }
    if key.trim() != key {
        return Err(RegistryError::InvalidIdentity(format!(
            "roll number {key:?} has surrounding whitespace"
        )));
    }
    if key.starts_with('.') || key.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(RegistryError::InvalidIdentity(format!(
            "roll number {key:?} is not usable as a sample file name"
        )));
    }
    if identity.name.trim().is_empty() {
        return Err(RegistryError::InvalidIdentity("name is empty".into()));
    }
    Ok(())
}
