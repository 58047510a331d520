// 💶 Kostentraeger Entity - the cost bearer billed for examinations
//
// Owns its contact persons. The optional default contact must be one of them.
// Deleting a cost bearer detaches the units billed through it and deletes its
// contacts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now, Kontaktperson, KontaktpersonFilter, Resource};
use crate::error::{AppError, FieldErrors, Result};
use crate::validation::{check_reference, FieldReader};

pub const MSG_FOREIGN_CONTACT: &str =
    "Die Standard-Kontaktperson muss zu diesem Kostenträger gehören.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kostentraeger {
    pub id: i64,
    pub firma: String,
    pub strasse: String,
    pub plz: String,
    pub ort: String,
    pub standard_kontakt: Option<i64>,
    /// Contacts of this cost bearer, loaded with the record
    #[serde(default)]
    pub kontaktpersonen: Vec<Kontaktperson>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KostentraegerInput {
    pub firma: String,
    pub strasse: String,
    pub plz: String,
    pub ort: String,
    pub standard_kontakt: Option<i64>,
}

impl KostentraegerInput {
    pub fn from_json(payload: &Value) -> Result<Self> {
        let mut reader = FieldReader::new(payload)?;
        let firma = reader.required_string("firma", 255);
        let strasse = reader.required_string("strasse", 255);
        let plz = reader.required_string("plz", 10);
        let ort = reader.required_string("ort", 255);
        let standard_kontakt = reader.optional_id("standard_kontakt");
        let errors = reader.into_errors();

        match (firma, strasse, plz, ort) {
            (Some(firma), Some(strasse), Some(plz), Some(ort)) if errors.is_empty() => {
                Ok(KostentraegerInput {
                    firma,
                    strasse,
                    plz,
                    ort,
                    standard_kontakt,
                })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KostentraegerFilter {}

const SELECT: &str = "SELECT id, firma, strasse, plz, ort, standard_kontakt_id, created_at, updated_at
                      FROM kostentraeger";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Kostentraeger> {
    Ok(Kostentraeger {
        id: row.get(0)?,
        firma: row.get(1)?,
        strasse: row.get(2)?,
        plz: row.get(3)?,
        ort: row.get(4)?,
        standard_kontakt: row.get(5)?,
        kontaktpersonen: Vec::new(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn with_contacts(conn: &Connection, mut record: Kostentraeger) -> Result<Kostentraeger> {
    record.kontaktpersonen = Kontaktperson::list(
        conn,
        &KontaktpersonFilter {
            kostentraeger: Some(record.id),
        },
    )?;
    Ok(record)
}

impl Resource for Kostentraeger {
    const NAME: &'static str = "Kostentraeger";

    type Input = KostentraegerInput;
    type Filter = KostentraegerFilter;

    fn id(&self) -> i64 {
        self.id
    }

    fn parse(payload: &Value) -> Result<KostentraegerInput> {
        KostentraegerInput::from_json(payload)
    }

    fn validate(conn: &Connection, input: &KostentraegerInput, current: Option<i64>) -> Result<()> {
        let Some(contact_id) = input.standard_kontakt else {
            return Ok(());
        };

        let mut errors = FieldErrors::new();
        check_reference(conn, &mut errors, "standard_kontakt", "kontaktperson", contact_id)?;
        if errors.is_empty() {
            let owner = Kontaktperson::get(conn, contact_id)?.map(|c| c.kostentraeger);
            if owner.is_none() || owner != current {
                errors.add("standard_kontakt", MSG_FOREIGN_CONTACT);
            }
        }
        errors.into_result()
    }

    fn insert(conn: &Connection, input: &KostentraegerInput) -> Result<Kostentraeger> {
        conn.execute(
            "INSERT INTO kostentraeger (firma, strasse, plz, ort, standard_kontakt_id,
                                        created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                input.firma,
                input.strasse,
                input.plz,
                input.ort,
                input.standard_kontakt,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::get(conn, id)?.ok_or_else(|| AppError::not_found(Self::NAME, id))
    }

    fn get(conn: &Connection, id: i64) -> Result<Option<Kostentraeger>> {
        let sql = format!("{} WHERE id = ?1", SELECT);
        match conn.query_row(&sql, params![id], from_row).optional()? {
            Some(record) => Ok(Some(with_contacts(conn, record)?)),
            None => Ok(None),
        }
    }

    fn list(conn: &Connection, _filter: &KostentraegerFilter) -> Result<Vec<Kostentraeger>> {
        let sql = format!("{} ORDER BY id", SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|record| with_contacts(conn, record))
            .collect()
    }

    fn replace(conn: &Connection, id: i64, input: &KostentraegerInput) -> Result<Kostentraeger> {
        let changed = conn.execute(
            "UPDATE kostentraeger
             SET firma = ?1, strasse = ?2, plz = ?3, ort = ?4, standard_kontakt_id = ?5,
                 updated_at = ?6
             WHERE id = ?7",
            params![
                input.firma,
                input.strasse,
                input.plz,
                input.ort,
                input.standard_kontakt,
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
        conn.execute(
            "UPDATE feuerwehr SET kostentraeger_id = NULL WHERE kostentraeger_id = ?1",
            params![id],
        )?;
        conn.execute(
            "UPDATE kostentraeger SET standard_kontakt_id = NULL WHERE id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM kontaktperson WHERE kostentraeger_id = ?1",
            params![id],
        )?;
        conn.execute("DELETE FROM kostentraeger WHERE id = ?1", params![id])?;
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
    use crate::entities::{Feuerwehr, FeuerwehrInput, KontaktpersonInput};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn bearer_input(standard_kontakt: Option<i64>) -> KostentraegerInput {
        KostentraegerInput {
            firma: "Gemeinde Musterstadt".to_string(),
            strasse: "Rathausplatz 1".to_string(),
            plz: "12345".to_string(),
            ort: "Musterstadt".to_string(),
            standard_kontakt,
        }
    }

    fn contact(conn: &Connection, kostentraeger: i64, nachname: &str) -> Kontaktperson {
        Kontaktperson::insert(
            conn,
            &KontaktpersonInput {
                kostentraeger,
                nachname: nachname.to_string(),
                vorname: "Erika".to_string(),
                position: "Sachbearbeitung".to_string(),
                telefon: "01234 5678".to_string(),
                email: "erika@musterstadt.de".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_contacts_embedded() {
        let conn = conn();
        let bearer = Kostentraeger::insert(&conn, &bearer_input(None)).unwrap();
        contact(&conn, bearer.id, "Schmidt");
        contact(&conn, bearer.id, "Meyer");

        let loaded = Kostentraeger::get(&conn, bearer.id).unwrap().unwrap();
        assert_eq!(loaded.kontaktpersonen.len(), 2);
        assert_eq!(loaded.kontaktpersonen[0].nachname, "Schmidt");
    }

    #[test]
    fn test_default_contact_must_belong_to_bearer() {
        let conn = conn();
        let own = Kostentraeger::insert(&conn, &bearer_input(None)).unwrap();
        let other = Kostentraeger::insert(&conn, &bearer_input(None)).unwrap();
        let own_contact = contact(&conn, own.id, "Schmidt");
        let foreign_contact = contact(&conn, other.id, "Meyer");

        Kostentraeger::validate(&conn, &bearer_input(Some(own_contact.id)), Some(own.id)).unwrap();

        let err = Kostentraeger::validate(&conn, &bearer_input(Some(foreign_contact.id)), Some(own.id))
            .unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert_eq!(errors.get("standard_kontakt").unwrap()[0], MSG_FOREIGN_CONTACT)
            }
            other => panic!("unexpected error: {other}"),
        }

        // A new bearer has no contacts yet
        assert!(Kostentraeger::validate(&conn, &bearer_input(Some(own_contact.id)), None).is_err());
    }

    #[test]
    fn test_delete_cascades_to_contacts_and_detaches_units() {
        let conn = conn();
        let bearer = Kostentraeger::insert(&conn, &bearer_input(None)).unwrap();
        let kontakt = contact(&conn, bearer.id, "Schmidt");
        Kostentraeger::replace(&conn, bearer.id, &bearer_input(Some(kontakt.id))).unwrap();

        let unit = Feuerwehr::insert(
            &conn,
            &FeuerwehrInput {
                name: "FF Musterstadt".to_string(),
                kostentraeger: Some(bearer.id),
            },
        )
        .unwrap();

        Kostentraeger::remove(&conn, bearer.id).unwrap();

        assert!(Kostentraeger::get(&conn, bearer.id).unwrap().is_none());
        assert!(Kontaktperson::get(&conn, kontakt.id).unwrap().is_none());
        let unit = Feuerwehr::get(&conn, unit.id).unwrap().unwrap();
        assert_eq!(unit.kostentraeger, None);
    }

    #[test]
    fn test_deleting_default_contact_clears_reference() {
        let conn = conn();
        let bearer = Kostentraeger::insert(&conn, &bearer_input(None)).unwrap();
        let kontakt = contact(&conn, bearer.id, "Schmidt");
        Kostentraeger::replace(&conn, bearer.id, &bearer_input(Some(kontakt.id))).unwrap();

        Kontaktperson::remove(&conn, kontakt.id).unwrap();

        let reloaded = Kostentraeger::get(&conn, bearer.id).unwrap().unwrap();
        assert_eq!(reloaded.standard_kontakt, None);
        assert!(reloaded.kontaktpersonen.is_empty());
    }
}
