//! SQLite-backed identity and attendance stores.

use crate::store::{AttendanceStore, IdentityStore, StoreError};
use crate::types::{AttendanceRecord, Identity};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DAY_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    roll_no       TEXT PRIMARY KEY NOT NULL,
    name          TEXT NOT NULL,
    department    TEXT NOT NULL DEFAULT '',
    classroom     TEXT NOT NULL DEFAULT '',
    date_of_birth TEXT,
    contact       TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS attendance (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    roll_no    TEXT NOT NULL,
    name       TEXT NOT NULL,
    department TEXT NOT NULL,
    classroom  TEXT NOT NULL,
    logged_at  TEXT NOT NULL,
    day        TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS attendance_once_per_day ON attendance (roll_no, day);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type IdentityRow = (String, String, String, String, Option<String>, String);
type RecordRow = (String, String, String, String, String, String);

fn identity_from_row(row: IdentityRow) -> Result<Identity, StoreError> {
    let (roll_no, name, department, classroom, dob, contact) = row;
    let date_of_birth = dob
        .map(|d| {
            NaiveDate::parse_from_str(&d, DAY_FORMAT)
                .map_err(|e| StoreError::Corrupt(format!("date_of_birth {d:?} for {roll_no}: {e}")))
        })
        .transpose()?;
    Ok(Identity {
        roll_no,
        name,
        department,
        classroom,
        date_of_birth,
        contact,
    })
}

fn record_from_row(row: RecordRow) -> Result<AttendanceRecord, StoreError> {
    let (id, roll_no, name, department, classroom, logged_at) = row;
    let logged_at = NaiveDateTime::parse_from_str(&logged_at, TIMESTAMP_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("logged_at {logged_at:?} in record {id}: {e}")))?;
    Ok(AttendanceRecord {
        id,
        roll_no,
        name,
        department,
        classroom,
        logged_at,
    })
}

const SELECT_IDENTITY: &str =
    "SELECT roll_no, name, department, classroom, date_of_birth, contact FROM identities";
const SELECT_RECORD: &str =
    "SELECT id, roll_no, name, department, classroom, logged_at FROM attendance";

fn read_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

impl IdentityStore for SqliteStore {
    fn upsert(&self, identity: &Identity) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO identities (roll_no, name, department, classroom, date_of_birth, contact)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(roll_no) DO UPDATE SET
                name = excluded.name,
                department = excluded.department,
                classroom = excluded.classroom,
                date_of_birth = excluded.date_of_birth,
                contact = excluded.contact",
            params![
                identity.roll_no,
                identity.name,
                identity.department,
                identity.classroom,
                identity.date_of_birth.map(|d| d.format(DAY_FORMAT).to_string()),
                identity.contact,
            ],
        )?;
        Ok(())
    }

    fn get(&self, roll_no: &str) -> Result<Option<Identity>, StoreError> {
        let row = self
            .conn()
            .query_row(
                &format!("{SELECT_IDENTITY} WHERE roll_no = ?1"),
                params![roll_no],
                read_identity,
            )
            .optional()?;
        row.map(identity_from_row).transpose()
    }

    fn remove(&self, roll_no: &str) -> Result<bool, StoreError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM identities WHERE roll_no = ?1", params![roll_no])?;
        Ok(deleted == 1)
    }

    fn all(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_IDENTITY} ORDER BY roll_no"))?;
        let rows = stmt
            .query_map([], read_identity)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(identity_from_row).collect()
    }
}

impl AttendanceStore for SqliteStore {
    fn append(&self, record: &AttendanceRecord) -> Result<bool, StoreError> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO attendance (id, roll_no, name, department, classroom, logged_at, day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.roll_no,
                record.name,
                record.department,
                record.classroom,
                record.logged_at.format(TIMESTAMP_FORMAT).to_string(),
                record.day().format(DAY_FORMAT).to_string(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} ORDER BY seq"))?;
        let rows = stmt.query_map([], read_record)?.collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(record_from_row).collect()
    }

    fn records_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} WHERE day = ?1 ORDER BY seq"))?;
        let rows = stmt
            .query_map(params![day.format(DAY_FORMAT).to_string()], read_record)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(record_from_row).collect()
    }
}
