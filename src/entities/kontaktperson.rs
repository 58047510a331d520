// 📇 Kontaktperson Entity - a contact at a cost bearer

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now, Resource};
use crate::error::{AppError, FieldErrors, Result};
use crate::validation::{check_reference, FieldReader};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kontaktperson {
    pub id: i64,
    pub kostentraeger: i64,
    pub nachname: String,
    pub vorname: String,
    pub position: String,
    pub telefon: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KontaktpersonInput {
    pub kostentraeger: i64,
    pub nachname: String,
    pub vorname: String,
    pub position: String,
    pub telefon: String,
    pub email: String,
}

impl KontaktpersonInput {
    pub fn from_json(payload: &Value) -> Result<Self> {
        let mut reader = FieldReader::new(payload)?;
        let kostentraeger = reader.required_id("kostentraeger");
        let nachname = reader.required_string("nachname", 255);
        let vorname = reader.required_string("vorname", 255);
        let position = reader.blank_string("position", 255);
        let telefon = reader.blank_string("telefon", 50);
        let email = reader.email("email", 254);
        let errors = reader.into_errors();

        match (kostentraeger, nachname, vorname) {
            (Some(kostentraeger), Some(nachname), Some(vorname)) if errors.is_empty() => {
                Ok(KontaktpersonInput {
                    kostentraeger,
                    nachname,
                    vorname,
                    position,
                    telefon,
                    email,
                })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KontaktpersonFilter {
    #[serde(default, deserialize_with = "super::empty_as_none")]
    pub kostentraeger: Option<i64>,
}

const SELECT: &str = "SELECT id, kostentraeger_id, nachname, vorname, position, telefon, email,
                             created_at, updated_at
                      FROM kontaktperson";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Kontaktperson> {
    Ok(Kontaktperson {
        id: row.get(0)?,
        kostentraeger: row.get(1)?,
        nachname: row.get(2)?,
        vorname: row.get(3)?,
        position: row.get(4)?,
        telefon: row.get(5)?,
        email: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Resource for Kontaktperson {
    const NAME: &'static str = "Kontaktperson";

    type Input = KontaktpersonInput;
    type Filter = KontaktpersonFilter;

    fn id(&self) -> i64 {
        self.id
    }

    fn parse(payload: &Value) -> Result<KontaktpersonInput> {
        KontaktpersonInput::from_json(payload)
    }

    fn validate(conn: &Connection, input: &KontaktpersonInput, _current: Option<i64>) -> Result<()> {
        let mut errors = FieldErrors::new();
        check_reference(conn, &mut errors, "kostentraeger", "kostentraeger", input.kostentraeger)?;
        errors.into_result()
    }

    fn insert(conn: &Connection, input: &KontaktpersonInput) -> Result<Kontaktperson> {
        conn.execute(
            "INSERT INTO kontaktperson (kostentraeger_id, nachname, vorname, position, telefon,
                                        email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                input.kostentraeger,
                input.nachname,
                input.vorname,
                input.position,
                input.telefon,
                input.email,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn get(conn: &Connection, id: i64) -> Result<Option<Kontaktperson>> {
        let sql = format!("{} WHERE id = ?1", SELECT);
        Ok(conn.query_row(&sql, params![id], from_row).optional()?)
    }

    fn list(conn: &Connection, filter: &KontaktpersonFilter) -> Result<Vec<Kontaktperson>> {
        let sql = format!(
            "{} WHERE (?1 IS NULL OR kostentraeger_id = ?1) ORDER BY id",
            SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![filter.kostentraeger], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn replace(conn: &Connection, id: i64, input: &KontaktpersonInput) -> Result<Kontaktperson> {
        let previous = Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))?;

        // A contact that moves away can no longer be its old bearer's default
        if previous.kostentraeger != input.kostentraeger {
            conn.execute(
                "UPDATE kostentraeger SET standard_kontakt_id = NULL
                 WHERE id = ?1 AND standard_kontakt_id = ?2",
                params![previous.kostentraeger, id],
            )?;
        }

        conn.execute(
            "UPDATE kontaktperson
             SET kostentraeger_id = ?1, nachname = ?2, vorname = ?3, position = ?4,
                 telefon = ?5, email = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                input.kostentraeger,
                input.nachname,
                input.vorname,
                input.position,
                input.telefon,
                input.email,
                now(),
                id,
            ],
        )?;
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn remove(conn: &Connection, id: i64) -> Result<()> {
        if Self::get(conn, id)?.is_none() {
            return Err(AppError::not_found(Self::NAME, id));
        }
        conn.execute(
            "UPDATE kostentraeger SET standard_kontakt_id = NULL WHERE standard_kontakt_id = ?1",
            params![id],
        )?;
        conn.execute("DELETE FROM kontaktperson WHERE id = ?1", params![id])?;
        Ok(())
    }
}
