use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod session;
mod state;

use config::{Bus, Config};
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use rollcall_vision::OnnxProvider;
use session::SessionManager;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        threshold = config.acceptance_threshold,
        bus = ?config.bus,
        session_idle_secs = config.session_idle.as_secs(),
        "configuration loaded"
    );

    let provider = OnnxProvider::load(&config.detector_model_path(), &config.recognizer_model_path())
        .context("loading face models")?;
    let state = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || AppState::open(&config, Arc::new(provider))).await??
    };

    let sessions = Arc::new(SessionManager::new(
        state,
        config.session_queue,
        config.session_idle,
    ));
    let service = AttendanceService::new(sessions.clone());

    let builder = match config.bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("claiming {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    let reaper = tokio::spawn(reap_idle_sessions(sessions));

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    reaper.abort();

    Ok(())
}

/// Periodically close sessions whose clients went away without ending them.
async fn reap_idle_sessions(sessions: Arc<SessionManager>) {
    let period = (sessions.idle_timeout() / 4).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let closed = sessions.reap_idle().await;
        if closed > 0 {
            tracing::debug!(closed, "idle sessions reaped");
        }
    }
}
