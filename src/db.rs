use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};

use crate::error::{AppError, Result};

/// Shared handle to the SQLite store
///
/// A single connection sits behind a mutex; every caller holds the lock for
/// the duration of its store work, so multi-row writes inside
/// [`Database::with_transaction`] are atomic and isolated.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run read-only or single-statement work against the connection
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| AppError::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside one transaction: committed on `Ok`, rolled back on `Err`
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| AppError::LockPoisoned)?;
        let mut tx = conn.transaction()?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Deletes walk the ownership tree explicitly; the constraints only guard it
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Cost bearers and their contacts
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kostentraeger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            firma TEXT NOT NULL,
            strasse TEXT NOT NULL,
            plz TEXT NOT NULL,
            ort TEXT NOT NULL,
            standard_kontakt_id INTEGER REFERENCES kontaktperson(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kontaktperson (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kostentraeger_id INTEGER NOT NULL REFERENCES kostentraeger(id),
            nachname TEXT NOT NULL,
            vorname TEXT NOT NULL,
            position TEXT NOT NULL DEFAULT '',
            telefon TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Units, patients, examinations (ownership chain)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feuerwehr (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kostentraeger_id INTEGER REFERENCES kostentraeger(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS patient (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feuerwehr_id INTEGER NOT NULL REFERENCES feuerwehr(id),
            nachname TEXT NOT NULL,
            vorname TEXT NOT NULL,
            geburtsdatum TEXT NOT NULL,
            geschlecht TEXT NOT NULL CHECK (geschlecht IN ('M', 'W', 'D')),
            strasse TEXT NOT NULL,
            plz TEXT NOT NULL,
            ort TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS untersuchung (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL REFERENCES patient(id),
            untersuchungsdatum TEXT NOT NULL,
            naechste_untersuchung TEXT,
            erstuntersuchung INTEGER NOT NULL DEFAULT 0,
            nachuntersuchung INTEGER NOT NULL DEFAULT 0,
            bewertung TEXT NOT NULL CHECK (bewertung IN ('JA', 'NEIN', 'BEDINGT')),
            bemerkungen TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (patient_id, untersuchungsdatum),
            CHECK (erstuntersuchung + nachuntersuchung = 1)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_patient_identity
         ON patient(feuerwehr_id, nachname, vorname, geburtsdatum)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_kontaktperson_kostentraeger
         ON kontaktperson(kostentraeger_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_feuerwehr_kostentraeger
         ON feuerwehr(kostentraeger_id)",
        [],
    )?;

    Ok(())
}
