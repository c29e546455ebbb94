//! Stream sessions: one sequential worker per session id.
//!
//! Frames for a session are queued on a bounded channel and handled in
//! arrival order by a dedicated OS thread, so identification and logging
//! never run on the async executor. Different sessions run in parallel;
//! the ledger serializes their writes. Sessions left idle past the
//! configured timeout are reaped, which lets their worker exit.

use crate::state::AppState;
use rollcall_core::{DetectionResult, Identity, LogStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session id must not be empty")]
    EmptyId,
    #[error("failed to spawn session worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("session worker exited")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    NewLog,
    AlreadyLogged,
    Unknown,
    /// The ledger could not read or write its store.
    Error,
}

impl From<LogStatus> for EntryStatus {
    fn from(status: LogStatus) -> Self {
        match status {
            LogStatus::NewLog => EntryStatus::NewLog,
            LogStatus::AlreadyLogged => EntryStatus::AlreadyLogged,
            LogStatus::Unknown => EntryStatus::Unknown,
        }
    }
}

/// Logging outcome for one recognized face.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub roll_no: String,
    pub status: EntryStatus,
    /// Enrolled metadata for the recognized person.
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply for one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub results: Vec<DetectionResult>,
    /// True if any detected face has eyes.
    pub eye_detected: bool,
    pub logs: Vec<LogEntry>,
}

/// Identify every face in `frame` and log each recognized person.
pub fn process_frame(state: &AppState, frame: &[u8]) -> FrameReport {
    let results = state.identifier.identify_encoded(frame);
    let eye_detected = results.iter().any(|r| r.has_eyes);
    let logs = results
        .iter()
        .filter_map(|r| r.roll_no.as_deref())
        .map(|roll_no| log_entry(state, roll_no))
        .collect();
    FrameReport {
        results,
        eye_detected,
        logs,
    }
}

fn log_entry(state: &AppState, roll_no: &str) -> LogEntry {
    match state.ledger.log_sighting(roll_no) {
        Ok((status, identity)) => LogEntry {
            roll_no: roll_no.to_string(),
            status: status.into(),
            identity,
            error: None,
        },
        Err(e) => {
            tracing::error!(roll_no, error = %e, "attendance log failed");
            LogEntry {
                roll_no: roll_no.to_string(),
                status: EntryStatus::Error,
                identity: None,
                error: Some(e.to_string()),
            }
        }
    }
}

struct FrameRequest {
    frame: Vec<u8>,
    reply: oneshot::Sender<FrameReport>,
}

/// Clone-safe handle to one session worker.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<FrameRequest>,
}

impl SessionHandle {
    /// Queue `frame` behind any earlier frames and wait for its report.
    pub async fn process(&self, frame: Vec<u8>) -> Result<FrameReport, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FrameRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

/// Spawn a worker thread for `session`. It exits once every handle is
/// dropped and its queue has drained.
pub fn spawn_session(
    session: &str,
    state: AppState,
    queue: usize,
) -> Result<SessionHandle, SessionError> {
    let (tx, mut rx) = mpsc::channel::<FrameRequest>(queue.max(1));
    let id = session.to_string();

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            tracing::debug!(session = %id, "session worker started");
            let mut frames = 0u64;
            while let Some(req) = rx.blocking_recv() {
                let report = process_frame(&state, &req.frame);
                frames += 1;
                tracing::trace!(
                    session = %id,
                    faces = report.results.len(),
                    logs = report.logs.len(),
                    "frame processed"
                );
                let _ = req.reply.send(report);
            }
            tracing::info!(session = %id, frames, "session worker exiting");
        })?;

    Ok(SessionHandle { tx })
}

struct SessionEntry {
    handle: SessionHandle,
    last_used: Instant,
}

/// Opens sessions on first use and routes frames to their workers.
pub struct SessionManager {
    state: AppState,
    queue: usize,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(state: AppState, queue: usize, idle_timeout: Duration) -> Self {
        Self {
            state,
            queue,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Process one frame on `session`, opening the session if needed.
    pub async fn process(&self, session: &str, frame: Vec<u8>) -> Result<FrameReport, SessionError> {
        let handle = self.handle_for(session).await?;
        let result = handle.process(frame).await;
        if matches!(result, Err(SessionError::ChannelClosed)) {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(session)
                .is_some_and(|e| e.handle.tx.same_channel(&handle.tx))
            {
                sessions.remove(session);
                tracing::warn!(session, "dropped session with dead worker");
            }
        }
        result
    }

    /// Close `session`. Returns false if it wasn't open.
    pub async fn end(&self, session: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let ended = sessions.remove(session).is_some();
        if ended {
            tracing::info!(session, active = sessions.len(), "stream session ended");
        }
        ended
    }

    /// Close every session that hasn't received a frame within the idle
    /// timeout. Returns how many were closed.
    pub async fn reap_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let idle = entry.last_used.elapsed();
            if idle < self.idle_timeout {
                return true;
            }
            tracing::info!(session = %id, idle_secs = idle.as_secs(), "idle stream session closed");
            false
        });
        before - sessions.len()
    }

    /// Number of open sessions.
    pub async fn active(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn handle_for(&self, session: &str) -> Result<SessionHandle, SessionError> {
        if session.is_empty() {
            return Err(SessionError::EmptyId);
        }
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(session) {
            entry.last_used = Instant::now();
            return Ok(entry.handle.clone());
        }
        let handle = spawn_session(session, self.state.clone(), self.queue)?;
        sessions.insert(
            session.to_string(),
            SessionEntry {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        tracing::info!(session, active = sessions.len(), "stream session opened");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{identity, test_state, test_state_with};
    use chrono::NaiveDate;
    use rollcall_core::testing::{blank_tile, encode, face_tile, frame_of};
    use rollcall_core::{AttendanceRecord, AttendanceStore, Identity, IdentityStore, SqliteStore, StoreError};
    use std::sync::atomic::{AtomicIsize, Ordering};
    use std::sync::Arc;

    const SIDE: u32 = 16;
    const IDLE: Duration = Duration::from_secs(300);

    fn register(state: &AppState, roll_no: &str, tone: u8) {
        state
            .registrar
            .register(identity(roll_no, "Student"), &encode(&face_tile(tone, true, SIDE)))
            .unwrap();
    }

    fn frame(tones: &[u8]) -> Vec<u8> {
        let tiles: Vec<_> = tones
            .iter()
            .map(|&t| {
                if t == 0 {
                    blank_tile(SIDE)
                } else {
                    face_tile(t, true, SIDE)
                }
            })
            .collect();
        encode(&frame_of(&tiles))
    }

    struct BrokenAttendance;

    impl AttendanceStore for BrokenAttendance {
        fn append(&self, _record: &AttendanceRecord) -> Result<bool, StoreError> {
            Err(StoreError::Corrupt("disk full".into()))
        }
        fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn records_on(&self, _day: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Identities whose lookups can be limited to a fixed number of calls.
    struct MeteredIdentities {
        inner: SqliteStore,
        /// Negative means unlimited.
        lookups_left: AtomicIsize,
    }

    impl IdentityStore for MeteredIdentities {
        fn upsert(&self, identity: &Identity) -> Result<(), StoreError> {
            self.inner.upsert(identity)
        }
        fn get(&self, roll_no: &str) -> Result<Option<Identity>, StoreError> {
            match self.lookups_left.load(Ordering::SeqCst) {
                0 => return Err(StoreError::Corrupt("lookup refused".into())),
                n if n > 0 => {
                    self.lookups_left.fetch_sub(1, Ordering::SeqCst);
                }
                _ => {}
            }
            self.inner.get(roll_no)
        }
        fn remove(&self, roll_no: &str) -> Result<bool, StoreError> {
            self.inner.remove(roll_no)
        }
        fn all(&self) -> Result<Vec<Identity>, StoreError> {
            self.inner.all()
        }
    }

    #[test]
    fn test_known_face_logged_once_per_day() {
        let (state, _dir) = test_state();
        register(&state, "R1", 90);

        let first = process_frame(&state, &frame(&[90]));
        assert_eq!(first.results.len(), 1);
        assert!(first.eye_detected);
        assert_eq!(first.logs.len(), 1);
        assert_eq!(first.logs[0].status, EntryStatus::NewLog);
        assert_eq!(first.logs[0].identity.as_ref().unwrap().classroom, "B-12");

        let second = process_frame(&state, &frame(&[90]));
        assert_eq!(second.logs[0].status, EntryStatus::AlreadyLogged);
        assert_eq!(state.ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_face_is_reported_not_logged() {
        let (state, _dir) = test_state();
        register(&state, "R1", 90);

        let report = process_frame(&state, &frame(&[0, 200]));
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].roll_no, None);
        assert!(report.logs.is_empty());
        assert!(state.ledger.records().unwrap().is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["results"][0]["roll_no"].is_null());
    }

    #[test]
    fn test_undecodable_frame_yields_empty_report() {
        let (state, _dir) = test_state();
        let report = process_frame(&state, b"not an image");
        assert!(report.results.is_empty());
        assert!(!report.eye_detected);
        assert!(report.logs.is_empty());
    }

    #[test]
    fn test_store_failure_reported_as_error_entry() {
        let identities = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (state, _dir) = test_state_with(identities, Arc::new(BrokenAttendance));
        register(&state, "R1", 90);

        let report = process_frame(&state, &frame(&[90]));
        assert_eq!(report.logs[0].status, EntryStatus::Error);
        assert!(report.logs[0].error.as_deref().unwrap().contains("disk full"));

        let json = serde_json::to_value(&report.logs[0]).unwrap();
        assert_eq!(json["status"], "ERROR");
    }

    #[test]
    fn test_entry_identity_comes_from_the_ledger_lookup() {
        let identities = Arc::new(MeteredIdentities {
            inner: SqliteStore::open_in_memory().unwrap(),
            lookups_left: AtomicIsize::new(-1),
        });
        let attendance = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (state, _dir) = test_state_with(identities.clone(), attendance);
        register(&state, "R1", 90);

        // One lookup for the whole entry; a second one would fail.
        identities.lookups_left.store(1, Ordering::SeqCst);
        let report = process_frame(&state, &frame(&[90]));
        assert_eq!(report.logs[0].status, EntryStatus::NewLog);
        assert_eq!(report.logs[0].identity.as_ref().unwrap().roll_no, "R1");
        assert!(report.logs[0].error.is_none());

        // A failing lookup surfaces as an error entry, never a silent `null`.
        let report = process_frame(&state, &frame(&[90]));
        assert_eq!(report.logs[0].status, EntryStatus::Error);
        assert!(report.logs[0].identity.is_none());
        assert!(report.logs[0].error.as_deref().unwrap().contains("lookup refused"));
    }

    #[tokio::test]
    async fn test_idle_sessions_reaped() {
        let (state, _dir) = test_state();
        let manager = SessionManager::new(state, 1, Duration::from_millis(50));
        manager.process("cam-old", frame(&[0])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.process("cam-new", frame(&[0])).await.unwrap();

        assert_eq!(manager.reap_idle().await, 1);
        assert_eq!(manager.active().await, 1);
        assert!(!manager.end("cam-old").await);
        assert!(manager.end("cam-new").await);

        // A reaped id reopens on its next frame.
        manager.process("cam-old", frame(&[0])).await.unwrap();
        assert_eq!(manager.active().await, 1);
    }

    #[tokio::test]
    async fn test_activity_keeps_session_open() {
        let (state, _dir) = test_state();
        let manager = SessionManager::new(state, 1, Duration::from_millis(200));
        for _ in 0..3 {
            manager.process("cam-1", frame(&[0])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(80)).await;
        }
        assert_eq!(manager.reap_idle().await, 0);
        assert_eq!(manager.active().await, 1);
    }

    #[tokio::test]
    async fn test_session_processes_frames_in_order() {
        let (state, _dir) = test_state();
        register(&state, "R1", 90);
        let manager = SessionManager::new(state, 2, IDLE);

        let statuses: Vec<_> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let report = manager.process("cam-1", frame(&[90])).await.unwrap();
                out.push(report.logs[0].status);
            }
            out
        };
        assert_eq!(
            statuses,
            vec![EntryStatus::NewLog, EntryStatus::AlreadyLogged, EntryStatus::AlreadyLogged]
        );
        assert_eq!(manager.active().await, 1);
    }

    #[tokio::test]
    async fn test_parallel_sessions_log_once() {
        let (state, _dir) = test_state();
        register(&state, "R1", 90);
        let manager = SessionManager::new(state, 4, IDLE);

        let (a, b) = tokio::join!(
            manager.process("cam-a", frame(&[90])),
            manager.process("cam-b", frame(&[90])),
        );
        let mut statuses = vec![a.unwrap().logs[0].status, b.unwrap().logs[0].status];
        statuses.sort_by_key(|s| *s != EntryStatus::NewLog);
        assert_eq!(statuses, vec![EntryStatus::NewLog, EntryStatus::AlreadyLogged]);
        assert_eq!(manager.active().await, 2);
        assert_eq!(manager.state().ledger.records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_session() {
        let (state, _dir) = test_state();
        let manager = SessionManager::new(state, 1, IDLE);
        manager.process("cam-1", frame(&[0])).await.unwrap();

        assert!(manager.end("cam-1").await);
        assert!(!manager.end("cam-1").await);
        assert_eq!(manager.active().await, 0);

        // Reopens on next use.
        manager.process("cam-1", frame(&[0])).await.unwrap();
        assert_eq!(manager.active().await, 1);
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let (state, _dir) = test_state();
        let manager = SessionManager::new(state, 1, IDLE);
        assert!(matches!(
            manager.process("", frame(&[90])).await,
            Err(SessionError::EmptyId)
        ));
    }
}
