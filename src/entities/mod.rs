// Entity Models - plain records over the relational store
//
// Each entity module has:
// - The stored record (what the API returns)
// - A typed input parsed from a JSON payload (what the API accepts)
// - Store functions behind the `Resource` trait: insert, get, list, replace, remove
//
// Ownership tree (walked explicitly on delete):
//   Feuerwehr → Patient → Untersuchung
//   Kostentraeger → Kontaktperson

pub mod feuerwehr;
pub mod kontaktperson;
pub mod kostentraeger;
pub mod patient;
pub mod untersuchung;

pub use feuerwehr::{Feuerwehr, FeuerwehrFilter, FeuerwehrInput};
pub use kontaktperson::{Kontaktperson, KontaktpersonFilter, KontaktpersonInput};
pub use kostentraeger::{Kostentraeger, KostentraegerFilter, KostentraegerInput};
pub use patient::{Geschlecht, Patient, PatientFilter, PatientInput};
pub use untersuchung::{Bewertung, Untersuchung, UntersuchungFilter, UntersuchungInput};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Store interface shared by all five entity types
///
/// Implementations never open their own transaction; callers pass either a
/// plain connection or a transaction (which derefs to one).
pub trait Resource: Sized + Serialize {
    /// Human-readable entity name for errors and logs
    const NAME: &'static str;

    type Input: Clone;
    type Filter: Default;

    fn id(&self) -> i64;

    /// Parse a JSON payload into a typed input, collecting field errors
    fn parse(payload: &Value) -> Result<Self::Input>;

    /// Checks that need the store: references, uniqueness, ownership.
    /// `current` is the id being updated, `None` on create.
    fn validate(conn: &Connection, input: &Self::Input, current: Option<i64>) -> Result<()>;

    fn insert(conn: &Connection, input: &Self::Input) -> Result<Self>;

    fn get(conn: &Connection, id: i64) -> Result<Option<Self>>;

    fn list(conn: &Connection, filter: &Self::Filter) -> Result<Vec<Self>>;

    /// Overwrite every writable field of an existing row
    fn replace(conn: &Connection, id: i64, input: &Self::Input) -> Result<Self>;

    /// Delete the row and everything it owns
    fn remove(conn: &Connection, id: i64) -> Result<()>;
}

/// Timestamp for created_at / updated_at
/// Filter id from a query string; `?feuerwehr=` reads as no filter
pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// True when a store error is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
