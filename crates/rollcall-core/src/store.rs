//! Persistence seams for identities, attendance records, and face samples.

use crate::types::{AttendanceRecord, Identity};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Raw reference image for one identity.
#[derive(Debug, Clone)]
pub struct Sample {
    pub roll_no: String,
    pub bytes: Vec<u8>,
}

pub trait IdentityStore: Send + Sync {
    /// Insert or replace by roll number.
    fn upsert(&self, identity: &Identity) -> Result<(), StoreError>;
    fn get(&self, roll_no: &str) -> Result<Option<Identity>, StoreError>;
    /// Delete by roll number. Returns `false` if nothing was stored.
    fn remove(&self, roll_no: &str) -> Result<bool, StoreError>;
    /// All identities, ordered by roll number.
    fn all(&self) -> Result<Vec<Identity>, StoreError>;
}

pub trait AttendanceStore: Send + Sync {
    /// Append a record. Returns `false`, appending nothing, when a record
    /// for the same roll number and day already exists.
    fn append(&self, record: &AttendanceRecord) -> Result<bool, StoreError>;
    /// Every record in append order.
    fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError>;
    /// Records whose timestamp falls on `day`, in append order.
    fn records_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError>;
}

pub trait SampleStore: Send + Sync {
    /// Store the reference image for `roll_no`, replacing any previous one.
    fn put(&self, roll_no: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn get(&self, roll_no: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Delete the sample for `roll_no`, if any.
    fn remove(&self, roll_no: &str) -> Result<(), StoreError>;
    fn samples(&self) -> Result<Vec<Sample>, StoreError>;
}
