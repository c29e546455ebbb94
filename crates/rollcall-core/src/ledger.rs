//! Attendance ledger: at most one record per identity per calendar day.
//!
//! The "already logged today?" check and the durable append run under one
//! mutex, so rapid or concurrent sightings of the same person cannot both
//! observe "no record yet". An in-memory index of the last logged day per
//! roll number replaces a scan of the full history on every sighting.

use crate::store::{AttendanceStore, IdentityStore, StoreError};
use crate::types::{AttendanceRecord, Identity, LogStatus};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance store: {0}")]
    Store(#[from] StoreError),
}

/// Source of the current local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

pub struct AttendanceLedger {
    identities: Arc<dyn IdentityStore>,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    /// Roll number → most recent day with a record.
    last_logged: Mutex<HashMap<String, NaiveDate>>,
}

impl AttendanceLedger {
    /// Open the ledger, indexing every existing record.
    pub fn open(
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let mut index: HashMap<String, NaiveDate> = HashMap::new();
        let records = store.records()?;
        for record in &records {
            let day = record.day();
            index
                .entry(record.roll_no.clone())
                .and_modify(|d| *d = (*d).max(day))
                .or_insert(day);
        }
        tracing::info!(records = records.len(), identities = index.len(), "attendance ledger indexed");

        Ok(Self {
            identities,
            store,
            clock,
            last_logged: Mutex::new(index),
        })
    }

    /// Log `roll_no` unless it already has a record today.
    ///
    /// Unknown roll numbers are reported, never created.
    pub fn log_if_new(&self, roll_no: &str) -> Result<LogStatus, LedgerError> {
        self.log_sighting(roll_no).map(|(status, _)| status)
    }

    /// Like [`log_if_new`](Self::log_if_new), also returning the identity
    /// the decision was made against (`None` when unknown).
    pub fn log_sighting(&self, roll_no: &str) -> Result<(LogStatus, Option<Identity>), LedgerError> {
        let Some(identity) = self.identities.get(roll_no)? else {
            tracing::debug!(roll_no, "log attempt for unknown identity");
            return Ok((LogStatus::Unknown, None));
        };

        let mut index = self.last_logged.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let now = now.with_nanosecond(0).unwrap_or(now);
        let today = now.date();

        if index.get(roll_no) == Some(&today) {
            return Ok((LogStatus::AlreadyLogged, Some(identity)));
        }

        let record = AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            roll_no: identity.roll_no.clone(),
            name: identity.name.clone(),
            department: identity.department.clone(),
            classroom: identity.classroom.clone(),
            logged_at: now,
        };
        let appended = self.store.append(&record)?;
        index.insert(record.roll_no.clone(), today);

        let status = if appended {
            tracing::info!(roll_no, logged_at = %record.logged_at, "attendance logged");
            LogStatus::NewLog
        } else {
            // Another writer to the same store got there first.
            tracing::debug!(roll_no, "store already holds today's record");
            LogStatus::AlreadyLogged
        };
        Ok((status, Some(identity)))
    }

    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.store.records()?)
    }

    pub fn records_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.store.records_on(day)?)
    }

    /// Today's date according to the ledger's clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }
}
