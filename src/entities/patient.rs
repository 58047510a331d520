// 🧑‍🚒 Patient Entity - a firefighter examined on behalf of a unit
//
// Identity for imports is the tuple (feuerwehr, nachname, vorname, geburtsdatum).
// Deleting a patient removes its examinations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now, Resource};
use crate::error::{AppError, FieldErrors, Result};
use crate::validation::{check_reference, FieldReader};

// ============================================================================
// GESCHLECHT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Geschlecht {
    #[serde(rename = "M")]
    Maennlich,
    #[serde(rename = "W")]
    Weiblich,
    #[serde(rename = "D")]
    Divers,
}

impl Geschlecht {
    /// Stored and transmitted code
    pub fn code(&self) -> &'static str {
        match self {
            Geschlecht::Maennlich => "M",
            Geschlecht::Weiblich => "W",
            Geschlecht::Divers => "D",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Geschlecht::Maennlich),
            "W" => Some(Geschlecht::Weiblich),
            "D" => Some(Geschlecht::Divers),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Geschlecht::Maennlich => "Männlich",
            Geschlecht::Weiblich => "Weiblich",
            Geschlecht::Divers => "Divers",
        }
    }
}

impl ToSql for Geschlecht {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Geschlecht {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        Geschlecht::from_code(code)
            .ok_or_else(|| FromSqlError::Other(format!("unknown geschlecht: {}", code).into()))
    }
}

// ============================================================================
// PATIENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub feuerwehr: i64,
    pub nachname: String,
    pub vorname: String,
    pub geburtsdatum: NaiveDate,
    pub geschlecht: Geschlecht,
    pub strasse: String,
    pub plz: String,
    pub ort: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// "Nachname, Vorname"
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.nachname, self.vorname)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientInput {
    pub feuerwehr: i64,
    pub nachname: String,
    pub vorname: String,
    pub geburtsdatum: NaiveDate,
    pub geschlecht: Geschlecht,
    pub strasse: String,
    pub plz: String,
    pub ort: String,
}

impl PatientInput {
    pub fn from_json(payload: &Value) -> Result<Self> {
        let mut reader = FieldReader::new(payload)?;
        let feuerwehr = reader.required_id("feuerwehr");
        let nachname = reader.required_string("nachname", 255);
        let vorname = reader.required_string("vorname", 255);
        let geburtsdatum = reader.required_date("geburtsdatum");
        let geschlecht = reader.required_choice::<Geschlecht>("geschlecht");
        let strasse = reader.required_string("strasse", 255);
        let plz = reader.required_string("plz", 10);
        let ort = reader.required_string("ort", 255);
        let errors = reader.into_errors();

        match (feuerwehr, nachname, vorname, geburtsdatum, geschlecht, strasse, plz, ort) {
            (
                Some(feuerwehr),
                Some(nachname),
                Some(vorname),
                Some(geburtsdatum),
                Some(geschlecht),
                Some(strasse),
                Some(plz),
                Some(ort),
            ) if errors.is_empty() => Ok(PatientInput {
                feuerwehr,
                nachname,
                vorname,
                geburtsdatum,
                geschlecht,
                strasse,
                plz,
                ort,
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientFilter {
    #[serde(default, deserialize_with = "super::empty_as_none")]
    pub feuerwehr: Option<i64>,
}

const SELECT: &str = "SELECT id, feuerwehr_id, nachname, vorname, geburtsdatum, geschlecht,
                             strasse, plz, ort, created_at, updated_at
                      FROM patient";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        feuerwehr: row.get(1)?,
        nachname: row.get(2)?,
        vorname: row.get(3)?,
        geburtsdatum: row.get(4)?,
        geschlecht: row.get(5)?,
        strasse: row.get(6)?,
        plz: row.get(7)?,
        ort: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Look up a patient by the import identity tuple; first match by id wins
pub fn find_by_identity(
    conn: &Connection,
    feuerwehr: i64,
    nachname: &str,
    vorname: &str,
    geburtsdatum: NaiveDate,
) -> Result<Option<Patient>> {
    let sql = format!(
        "{} WHERE feuerwehr_id = ?1 AND nachname = ?2 AND vorname = ?3 AND geburtsdatum = ?4
         ORDER BY id LIMIT 1",
        SELECT
    );
    Ok(conn
        .query_row(&sql, params![feuerwehr, nachname, vorname, geburtsdatum], from_row)
        .optional()?)
}

impl Resource for Patient {
    const NAME: &'static str = "Patient";

    type Input = PatientInput;
    type Filter = PatientFilter;

    fn id(&self) -> i64 {
        self.id
    }

    fn parse(payload: &Value) -> Result<PatientInput> {
        PatientInput::from_json(payload)
    }

    fn validate(conn: &Connection, input: &PatientInput, _current: Option<i64>) -> Result<()> {
        let mut errors = FieldErrors::new();
        check_reference(conn, &mut errors, "feuerwehr", "feuerwehr", input.feuerwehr)?;
        errors.into_result()
    }

    fn insert(conn: &Connection, input: &PatientInput) -> Result<Patient> {
        conn.execute(
            "INSERT INTO patient (feuerwehr_id, nachname, vorname, geburtsdatum, geschlecht,
                                  strasse, plz, ort, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                input.feuerwehr,
                input.nachname,
                input.vorname,
                input.geburtsdatum,
                input.geschlecht,
                input.strasse,
                input.plz,
                input.ort,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn get(conn: &Connection, id: i64) -> Result<Option<Patient>> {
        let sql = format!("{} WHERE id = ?1", SELECT);
        Ok(conn.query_row(&sql, params![id], from_row).optional()?)
    }

    fn list(conn: &Connection, filter: &PatientFilter) -> Result<Vec<Patient>> {
        let sql = format!("{} WHERE (?1 IS NULL OR feuerwehr_id = ?1) ORDER BY id", SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![filter.feuerwehr], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn replace(conn: &Connection, id: i64, input: &PatientInput) -> Result<Patient> {
        let changed = conn.execute(
            "UPDATE patient
             SET feuerwehr_id = ?1, nachname = ?2, vorname = ?3, geburtsdatum = ?4,
                 geschlecht = ?5, strasse = ?6, plz = ?7, ort = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                input.feuerwehr,
                input.nachname,
                input.vorname,
                input.geburtsdatum,
                input.geschlecht,
                input.strasse,
                input.plz,
                input.ort,
                now(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::not_found(Self::NAME, id));
        }
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn remove(conn: &Connection, id: i64) -> Result<()> {
        if Self::get(conn, id)?.is_none() {
            return Err(AppError::not_found(Self::NAME, id));
        }
        conn.execute("DELETE FROM untersuchung WHERE patient_id = ?1", params![id])?;
        conn.execute("DELETE FROM patient WHERE id = ?1", params![id])?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
