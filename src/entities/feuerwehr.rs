// 🚒 Feuerwehr Entity - the unit that owns patients
//
// A unit optionally bills through one Kostenträger. Deleting a unit removes
// its patients and, through them, their examinations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now, Patient, Resource};
use crate::error::{AppError, FieldErrors, Result};
use crate::validation::{check_reference, FieldReader};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feuerwehr {
    pub id: i64,
    pub name: String,
    /// Cost bearer billed for this unit's examinations
    pub kostentraeger: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeuerwehrInput {
    pub name: String,
    pub kostentraeger: Option<i64>,
}

impl FeuerwehrInput {
    pub fn from_json(payload: &Value) -> Result<Self> {
        let mut reader = FieldReader::new(payload)?;
        let name = reader.required_string("name", 255);
        let kostentraeger = reader.optional_id("kostentraeger");
        let errors = reader.into_errors();

        match name {
            Some(name) if errors.is_empty() => Ok(FeuerwehrInput {
                name,
                kostentraeger,
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeuerwehrFilter {
    #[serde(default, deserialize_with = "super::empty_as_none")]
    pub kostentraeger: Option<i64>,
}

const SELECT: &str = "SELECT id, name, kostentraeger_id, created_at, updated_at FROM feuerwehr";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Feuerwehr> {
    Ok(Feuerwehr {
        id: row.get(0)?,
        name: row.get(1)?,
        kostentraeger: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl Resource for Feuerwehr {
    const NAME: &'static str = "Feuerwehr";

    type Input = FeuerwehrInput;
    type Filter = FeuerwehrFilter;

    fn id(&self) -> i64 {
        self.id
    }

    fn parse(payload: &Value) -> Result<FeuerwehrInput> {
        FeuerwehrInput::from_json(payload)
    }

    fn validate(conn: &Connection, input: &FeuerwehrInput, _current: Option<i64>) -> Result<()> {
        let mut errors = FieldErrors::new();
        if let Some(kostentraeger) = input.kostentraeger {
            check_reference(conn, &mut errors, "kostentraeger", "kostentraeger", kostentraeger)?;
        }
        errors.into_result()
    }

    fn insert(conn: &Connection, input: &FeuerwehrInput) -> Result<Feuerwehr> {
        let ts = now();
        conn.execute(
            "INSERT INTO feuerwehr (name, kostentraeger_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![input.name, input.kostentraeger, ts],
        )?;
        let id = conn.last_insert_rowid();
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn get(conn: &Connection, id: i64) -> Result<Option<Feuerwehr>> {
        let sql = format!("{} WHERE id = ?1", SELECT);
        Ok(conn.query_row(&sql, params![id], from_row).optional()?)
    }

    fn list(conn: &Connection, filter: &FeuerwehrFilter) -> Result<Vec<Feuerwehr>> {
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

    fn replace(conn: &Connection, id: i64, input: &FeuerwehrInput) -> Result<Feuerwehr> {
        let changed = conn.execute(
            "UPDATE feuerwehr SET name = ?1, kostentraeger_id = ?2, updated_at = ?3 WHERE id = ?4",
            params![input.name, input.kostentraeger, now(), id],
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

        let patient_ids: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT id FROM patient WHERE feuerwehr_id = ?1")?;
            let ids = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        for patient_id in patient_ids {
            Patient::remove(conn, patient_id)?;
        }

        conn.execute("DELETE FROM feuerwehr WHERE id = ?1", params![id])?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_feuerwehr_crud() {
        let conn = conn();
        let input = FeuerwehrInput::from_json(&json!({ "name": "FF Musterstadt" })).unwrap();

        let created = Feuerwehr::insert(&conn, &input).unwrap();
        assert_eq!(created.name, "FF Musterstadt");
        assert_eq!(created.kostentraeger, None);
        assert_eq!(created.created_at, created.updated_at);

        let renamed = FeuerwehrInput {
            name: "FF Neustadt".to_string(),
            kostentraeger: None,
        };
        let updated = Feuerwehr::replace(&conn, created.id, &renamed).unwrap();
        assert_eq!(updated.name, "FF Neustadt");
        assert_eq!(updated.created_at, created.created_at);

        assert_eq!(Feuerwehr::list(&conn, &FeuerwehrFilter::default()).unwrap().len(), 1);

        Feuerwehr::remove(&conn, created.id).unwrap();
        assert!(Feuerwehr::get(&conn, created.id).unwrap().is_none());
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = FeuerwehrInput::from_json(&json!({ "kostentraeger": null })).unwrap_err();
        match err {
            AppError::Validation(errors) => assert!(errors.contains("name")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_kostentraeger_rejected() {
        let conn = conn();
        let input = FeuerwehrInput::from_json(&json!({ "name": "FF", "kostentraeger": 42 })).unwrap();

        let err = Feuerwehr::validate(&conn, &input, None).unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert_eq!(
                    errors.get("kostentraeger").unwrap()[0],
                    "Ungültiger pk \"42\" - Objekt existiert nicht."
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let conn = conn();
        let err = Feuerwehr::remove(&conn, 7).unwrap_err();
        assert!(err.is_not_found());
    }
}
