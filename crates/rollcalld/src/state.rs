use crate::config::Config;
use anyhow::{Context, Result};
use rollcall_core::{
    AttendanceLedger, AttendanceStore, Clock, FaceProvider, GalleryHandle, Identifier,
    IdentifierConfig, IdentityStore, LocalClock, Registrar, RegistrarConfig, SampleDir,
    SampleStore, SqliteStore,
};
use std::sync::Arc;

/// Everything the request handlers share.
#[derive(Clone)]
pub struct AppState {
    pub identifier: Arc<Identifier>,
    pub ledger: Arc<AttendanceLedger>,
    pub registrar: Arc<Registrar>,
    pub identities: Arc<dyn IdentityStore>,
}

impl AppState {
    /// Open the stores named by `config` and train the initial gallery.
    pub fn open(config: &Config, provider: Arc<dyn FaceProvider>) -> Result<Self> {
        config.ensure_dirs()?;
        let store = Arc::new(
            SqliteStore::open(&config.db_path)
                .with_context(|| format!("opening {}", config.db_path.display()))?,
        );
        let samples = Arc::new(
            SampleDir::open(&config.faces_dir)
                .with_context(|| format!("opening {}", config.faces_dir.display()))?,
        );
        tracing::info!(
            db = %config.db_path.display(),
            faces = %config.faces_dir.display(),
            "stores opened"
        );

        let state = Self::assemble(
            provider,
            store.clone(),
            store,
            samples,
            Arc::new(LocalClock),
            IdentifierConfig {
                acceptance_threshold: config.acceptance_threshold,
            },
            RegistrarConfig {
                reject_faceless: config.reject_faceless,
            },
        )?;
        let gallery = state.registrar.rebuild_gallery()?;
        tracing::info!(profiles = gallery.profiles(), "initial gallery ready");
        Ok(state)
    }

    /// Wire the components over already-open stores. The gallery starts empty.
    pub fn assemble(
        provider: Arc<dyn FaceProvider>,
        identities: Arc<dyn IdentityStore>,
        attendance: Arc<dyn AttendanceStore>,
        samples: Arc<dyn SampleStore>,
        clock: Arc<dyn Clock>,
        identifier_config: IdentifierConfig,
        registrar_config: RegistrarConfig,
    ) -> Result<Self> {
        let identifier = Arc::new(Identifier::new(
            provider,
            Arc::new(GalleryHandle::new()),
            identifier_config,
        ));
        let ledger = Arc::new(AttendanceLedger::open(identities.clone(), attendance, clock)?);
        let registrar = Arc::new(Registrar::new(
            identifier.clone(),
            identities.clone(),
            samples,
            registrar_config,
        ));
        Ok(Self {
            identifier,
            ledger,
            registrar,
            identities,
        })
    }
}
