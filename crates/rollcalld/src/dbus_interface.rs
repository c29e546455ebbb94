use crate::session::{SessionError, SessionManager};
use chrono::NaiveDate;
use rollcall_core::{Identity, RegistryError};
use serde::Serialize;
use std::sync::Arc;
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every reply is a JSON document. Frames and reference images are encoded
/// image bytes (JPEG or PNG).
pub struct AttendanceService {
    sessions: Arc<SessionManager>,
}

impl AttendanceService {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Identify and log every face in one frame of a stream session.
    async fn process_frame(&self, session: &str, frame: Vec<u8>) -> fdo::Result<String> {
        let report = self
            .sessions
            .process(session, frame)
            .await
            .map_err(|e| match e {
                SessionError::EmptyId => fdo::Error::InvalidArgs(e.to_string()),
                other => failed(other),
            })?;
        to_json(&report)
    }

    /// Close a stream session. Returns false if it wasn't open.
    async fn end_session(&self, session: &str) -> fdo::Result<bool> {
        Ok(self.sessions.end(session).await)
    }

    /// Identify faces without logging attendance.
    async fn identify(&self, frame: Vec<u8>) -> fdo::Result<String> {
        let identifier = self.sessions.state().identifier.clone();
        let results = blocking(move || identifier.identify_encoded(&frame)).await?;
        to_json(&results)
    }

    /// Enroll an identity given as JSON with its reference image.
    async fn register(&self, identity: &str, image: Vec<u8>) -> fdo::Result<String> {
        let identity: Identity = serde_json::from_str(identity)
            .map_err(|e| fdo::Error::InvalidArgs(format!("identity: {e}")))?;
        tracing::info!(roll_no = %identity.roll_no, bytes = image.len(), "register requested");

        let registrar = self.sessions.state().registrar.clone();
        let outcome = blocking(move || registrar.register(identity, &image))
            .await?
            .map_err(|e| match e {
                RegistryError::InvalidIdentity(_) => fdo::Error::InvalidArgs(e.to_string()),
                other => failed(other),
            })?;
        to_json(&outcome)
    }

    /// Attendance records for `day` (`YYYY-MM-DD`), or all records when empty.
    async fn list_attendance(&self, day: &str) -> fdo::Result<String> {
        let day = parse_day(day)?;
        let ledger = self.sessions.state().ledger.clone();
        let records = blocking(move || match day {
            Some(day) => ledger.records_on(day),
            None => ledger.records(),
        })
        .await?
        .map_err(failed)?;
        to_json(&records)
    }

    async fn list_identities(&self) -> fdo::Result<String> {
        let identities = self.sessions.state().identities.clone();
        let all = blocking(move || identities.all()).await?.map_err(failed)?;
        to_json(&all)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let state = self.sessions.state();
        let gallery = state.identifier.gallery().current();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_version": gallery.version(),
            "profiles": gallery.profiles(),
            "acceptance_threshold": state.identifier.config().acceptance_threshold,
            "active_sessions": self.sessions.active().await,
            "today": state.ledger.today().to_string(),
        })
        .to_string())
    }
}

async fn blocking<T, F>(f: F) -> fdo::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| fdo::Error::Failed(format!("worker task failed: {e}")))
}

fn failed(e: impl std::fmt::Display) -> fdo::Error {
    tracing::error!(error = %e, "request failed");
    fdo::Error::Failed(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn parse_day(day: &str) -> fdo::Result<Option<NaiveDate>> {
    if day.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| fdo::Error::InvalidArgs(format!("day {day:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use rollcall_core::testing::{encode, face_tile, frame_of};

    fn service() -> (AttendanceService, tempfile::TempDir) {
        let (state, dir) = test_state();
        let sessions = SessionManager::new(state, 2, std::time::Duration::from_secs(60));
        (AttendanceService::new(Arc::new(sessions)), dir)
    }

    fn face(tone: u8) -> Vec<u8> {
        encode(&frame_of(&[face_tile(tone, true, 16)]))
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("").unwrap(), None);
        assert_eq!(
            parse_day("2024-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(matches!(parse_day("03/01/2024"), Err(fdo::Error::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn test_register_then_stream_and_list() {
        let (svc, _dir) = service();
        let reply = svc
            .register(r#"{"roll_no":"R7","name":"Meera","classroom":"A-1"}"#, face(120))
            .await
            .unwrap();
        let outcome: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(outcome["status"], "registered");

        let report: serde_json::Value =
            serde_json::from_str(&svc.process_frame("gate", face(120)).await.unwrap()).unwrap();
        assert_eq!(report["logs"][0]["status"], "NEW_LOG");
        assert_eq!(report["logs"][0]["identity"]["name"], "Meera");

        let records: serde_json::Value =
            serde_json::from_str(&svc.list_attendance("").await.unwrap()).unwrap();
        assert_eq!(records.as_array().unwrap().len(), 1);
        assert_eq!(records[0]["roll_no"], "R7");

        let identities: serde_json::Value =
            serde_json::from_str(&svc.list_identities().await.unwrap()).unwrap();
        assert_eq!(identities[0]["classroom"], "A-1");

        assert!(svc.end_session("gate").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_conflict_and_bad_identity() {
        let (svc, _dir) = service();
        svc.register(r#"{"roll_no":"R1","name":"A"}"#, face(60))
            .await
            .unwrap();

        let reply = svc
            .register(r#"{"roll_no":"R2","name":"B"}"#, face(60))
            .await
            .unwrap();
        let outcome: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(outcome["status"], "conflict");
        assert_eq!(outcome["existing"], "R1");

        assert!(matches!(
            svc.register("{not json", face(60)).await,
            Err(fdo::Error::InvalidArgs(_))
        ));
        assert!(matches!(
            svc.register(r#"{"roll_no":"../x","name":"C"}"#, face(200)).await,
            Err(fdo::Error::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn test_identify_does_not_log() {
        let (svc, _dir) = service();
        svc.register(r#"{"roll_no":"R1","name":"A"}"#, face(60))
            .await
            .unwrap();

        let results: serde_json::Value =
            serde_json::from_str(&svc.identify(face(60)).await.unwrap()).unwrap();
        assert_eq!(results[0]["roll_no"], "R1");
        assert_eq!(svc.list_attendance("").await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_status_reports_gallery() {
        let (svc, _dir) = service();
        let status: serde_json::Value = serde_json::from_str(&svc.status().await.unwrap()).unwrap();
        assert_eq!(status["profiles"], 0);
        assert_eq!(status["active_sessions"], 0);
    }
}
