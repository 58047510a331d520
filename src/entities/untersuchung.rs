// 🩺 Untersuchung Entity - a dated fitness assessment of a patient
//
// Two invariants hold for every stored row:
// - exactly one of erstuntersuchung / nachuntersuchung is set
// - at most one examination per (patient, untersuchungsdatum)

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{is_unique_violation, now, Resource};
use crate::error::{AppError, FieldErrors, Result, NON_FIELD_ERRORS};
use crate::validation::{check_reference, FieldReader};

pub const MSG_BOTH_TYPES: &str =
    "Es kann nur ein Untersuchungstyp (Erstuntersuchung oder Nachuntersuchung) ausgewählt werden.";
pub const MSG_NO_TYPE: &str =
    "Es muss ein Untersuchungstyp (Erstuntersuchung oder Nachuntersuchung) ausgewählt werden.";
pub const MSG_DUPLICATE_DATE: &str =
    "Die Felder patient, untersuchungsdatum müssen eine eindeutige Menge bilden.";

// ============================================================================
// BEWERTUNG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bewertung {
    /// Suitable
    #[serde(rename = "JA")]
    Geeignet,
    /// Not suitable
    #[serde(rename = "NEIN")]
    NichtGeeignet,
    /// Conditionally suitable
    #[serde(rename = "BEDINGT")]
    BedingtGeeignet,
}

impl Bewertung {
    pub fn code(&self) -> &'static str {
        match self {
            Bewertung::Geeignet => "JA",
            Bewertung::NichtGeeignet => "NEIN",
            Bewertung::BedingtGeeignet => "BEDINGT",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "JA" => Some(Bewertung::Geeignet),
            "NEIN" => Some(Bewertung::NichtGeeignet),
            "BEDINGT" => Some(Bewertung::BedingtGeeignet),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Bewertung::Geeignet => "Geeignet",
            Bewertung::NichtGeeignet => "Nicht geeignet",
            Bewertung::BedingtGeeignet => "Bedingt geeignet",
        }
    }
}

impl ToSql for Bewertung {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Bewertung {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        Bewertung::from_code(code)
            .ok_or_else(|| FromSqlError::Other(format!("unknown bewertung: {}", code).into()))
    }
}

// ============================================================================
// UNTERSUCHUNG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Untersuchung {
    pub id: i64,
    pub patient: i64,
    pub untersuchungsdatum: NaiveDate,
    pub naechste_untersuchung: Option<NaiveDate>,
    pub erstuntersuchung: bool,
    pub nachuntersuchung: bool,
    pub bewertung: Bewertung,
    pub bemerkungen: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Untersuchung {
    pub fn typ_label(&self) -> &'static str {
        if self.erstuntersuchung {
            "Erstuntersuchung"
        } else {
            "Nachuntersuchung"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UntersuchungInput {
    pub patient: i64,
    pub untersuchungsdatum: NaiveDate,
    pub naechste_untersuchung: Option<NaiveDate>,
    pub erstuntersuchung: bool,
    pub nachuntersuchung: bool,
    pub bewertung: Bewertung,
    pub bemerkungen: Option<String>,
}

impl UntersuchungInput {
    pub fn from_json(payload: &Value) -> Result<Self> {
        let mut reader = FieldReader::new(payload)?;
        let patient = reader.required_id("patient");
        let untersuchungsdatum = reader.required_date("untersuchungsdatum");
        let naechste_untersuchung = reader.optional_date("naechste_untersuchung");
        let erstuntersuchung = reader.flag("erstuntersuchung");
        let nachuntersuchung = reader.flag("nachuntersuchung");
        let bewertung = reader.required_choice::<Bewertung>("bewertung");
        let bemerkungen = reader.nullable_text("bemerkungen");

        if erstuntersuchung && nachuntersuchung {
            reader.error(NON_FIELD_ERRORS, MSG_BOTH_TYPES);
        } else if !erstuntersuchung && !nachuntersuchung {
            reader.error(NON_FIELD_ERRORS, MSG_NO_TYPE);
        }
        let errors = reader.into_errors();

        match (patient, untersuchungsdatum, bewertung) {
            (Some(patient), Some(untersuchungsdatum), Some(bewertung)) if errors.is_empty() => {
                Ok(UntersuchungInput {
                    patient,
                    untersuchungsdatum,
                    naechste_untersuchung,
                    erstuntersuchung,
                    nachuntersuchung,
                    bewertung,
                    bemerkungen,
                })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UntersuchungFilter {
    #[serde(default, deserialize_with = "super::empty_as_none")]
    pub patient: Option<i64>,
}

const SELECT: &str = "SELECT id, patient_id, untersuchungsdatum, naechste_untersuchung,
                             erstuntersuchung, nachuntersuchung, bewertung, bemerkungen,
                             created_at, updated_at
                      FROM untersuchung";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Untersuchung> {
    Ok(Untersuchung {
        id: row.get(0)?,
        patient: row.get(1)?,
        untersuchungsdatum: row.get(2)?,
        naechste_untersuchung: row.get(3)?,
        erstuntersuchung: row.get(4)?,
        nachuntersuchung: row.get(5)?,
        bewertung: row.get(6)?,
        bemerkungen: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn duplicate_conflict() -> AppError {
    AppError::Conflict(FieldErrors::single(NON_FIELD_ERRORS, MSG_DUPLICATE_DATE))
}

/// A UNIQUE(patient, date) hit that slipped past the pre-check is still a conflict
fn map_write_error(err: rusqlite::Error) -> AppError {
    if is_unique_violation(&err) {
        duplicate_conflict()
    } else {
        AppError::Database(err)
    }
}

/// The examination of `patient` on `date`, if one exists
pub fn find_by_patient_and_date(
    conn: &Connection,
    patient: i64,
    date: NaiveDate,
) -> Result<Option<Untersuchung>> {
    let sql = format!("{} WHERE patient_id = ?1 AND untersuchungsdatum = ?2", SELECT);
    Ok(conn
        .query_row(&sql, params![patient, date], from_row)
        .optional()?)
}

impl Resource for Untersuchung {
    const NAME: &'static str = "Untersuchung";

    type Input = UntersuchungInput;
    type Filter = UntersuchungFilter;

    fn id(&self) -> i64 {
        self.id
    }

    fn parse(payload: &Value) -> Result<UntersuchungInput> {
        UntersuchungInput::from_json(payload)
    }

    fn validate(conn: &Connection, input: &UntersuchungInput, current: Option<i64>) -> Result<()> {
        let mut errors = FieldErrors::new();
        check_reference(conn, &mut errors, "patient", "patient", input.patient)?;
        errors.into_result()?;

        match find_by_patient_and_date(conn, input.patient, input.untersuchungsdatum)? {
            Some(existing) if Some(existing.id) != current => Err(duplicate_conflict()),
            _ => Ok(()),
        }
    }

    fn insert(conn: &Connection, input: &UntersuchungInput) -> Result<Untersuchung> {
        conn.execute(
            "INSERT INTO untersuchung (patient_id, untersuchungsdatum, naechste_untersuchung,
                                       erstuntersuchung, nachuntersuchung, bewertung, bemerkungen,
                                       created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                input.patient,
                input.untersuchungsdatum,
                input.naechste_untersuchung,
                input.erstuntersuchung,
                input.nachuntersuchung,
                input.bewertung,
                input.bemerkungen,
                now(),
            ],
        )
        .map_err(map_write_error)?;
        let id = conn.last_insert_rowid();
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn get(conn: &Connection, id: i64) -> Result<Option<Untersuchung>> {
        let sql = format!("{} WHERE id = ?1", SELECT);
        Ok(conn.query_row(&sql, params![id], from_row).optional()?)
    }

    fn list(conn: &Connection, filter: &UntersuchungFilter) -> Result<Vec<Untersuchung>> {
        let sql = format!("{} WHERE (?1 IS NULL OR patient_id = ?1) ORDER BY id", SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![filter.patient], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn replace(conn: &Connection, id: i64, input: &UntersuchungInput) -> Result<Untersuchung> {
        let changed = conn
            .execute(
                "UPDATE untersuchung
                 SET patient_id = ?1, untersuchungsdatum = ?2, naechste_untersuchung = ?3,
                     erstuntersuchung = ?4, nachuntersuchung = ?5, bewertung = ?6,
                     bemerkungen = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    input.patient,
                    input.untersuchungsdatum,
                    input.naechste_untersuchung,
                    input.erstuntersuchung,
                    input.nachuntersuchung,
                    input.bewertung,
                    input.bemerkungen,
                    now(),
                    id,
                ],
            )
            .map_err(map_write_error)?;
        if changed == 0 {
            return Err(AppError::not_found(Self::NAME, id));
        }
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn remove(conn: &Connection, id: i64) -> Result<()> {
        let deleted = conn.execute("DELETE FROM untersuchung WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(AppError::not_found(Self::NAME, id));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
