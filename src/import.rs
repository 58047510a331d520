// 📥 Import Service - bulk upsert of patients with their examinations
//
// Payload: a list of `{ "patient": {...}, "untersuchungen": [{...}, ...] }`
// records; a bare record object counts as a one-element list.
//
// Two entry points with different policies:
// - `import_untersuchungen`: all-or-nothing. Existing patients and
//   examinations are reused untouched; only missing rows are created.
// - `import_patienten`: scoped to one unit, per-record. Existing rows are
//   updated with the supplied fields; rejected records are reported and the
//   rest of the batch still goes through.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::db::Database;
use crate::entities::patient::find_by_identity;
use crate::entities::untersuchung::find_by_patient_and_date;
use crate::entities::{Feuerwehr, Patient, Resource, Untersuchung};
use crate::error::{AppError, Result};
use crate::service::{create_in, update_in};
use crate::validation::{coerce_text, DATE_FORMAT};

pub const MSG_IMPORTED: &str = "Daten erfolgreich importiert";
pub const MSG_UNIT_NOT_FOUND: &str = "Feuerwehr nicht gefunden.";

/// Outcome of the transactional import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub patients_created: usize,
    pub patients_matched: usize,
    pub untersuchungen_created: usize,
    pub untersuchungen_skipped: usize,
}

/// Outcome of the unit-scoped import
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub imported: Vec<Patient>,
    pub errors: Vec<String>,
    pub total_imported: usize,
    pub total_errors: usize,
}

struct ImportRecord<'a> {
    patient: Option<&'a Value>,
    untersuchungen: &'a [Value],
}

fn records(payload: &Value) -> Result<Vec<ImportRecord<'_>>> {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![payload],
        _ => {
            return Err(AppError::BadRequest(
                "Erwartet eine Liste von Datensätzen.".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .map(|item| {
            let object = item.as_object().ok_or_else(|| {
                AppError::BadRequest("Jeder Datensatz muss ein Objekt sein.".to_string())
            })?;
            let untersuchungen: &[Value] = match object.get("untersuchungen") {
                None | Some(Value::Null) => &[],
                Some(Value::Array(list)) => list.as_slice(),
                Some(_) => {
                    return Err(AppError::BadRequest(
                        "untersuchungen muss eine Liste sein.".to_string(),
                    ))
                }
            };
            Ok(ImportRecord {
                patient: object.get("patient"),
                untersuchungen,
            })
        })
        .collect()
}

fn text_key(object: &Map<String, Value>, key: &str) -> Option<String> {
    coerce_text(object.get(key)?)
}

fn date_key(object: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    let raw = object.get(key)?.as_str()?;
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

fn id_key(object: &Map<String, Value>, key: &str) -> Option<i64> {
    match object.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn missing(key: &str) -> AppError {
    AppError::BadRequest(format!("Pflichtfeld fehlt oder ist ungültig: {}", key))
}

/// Supplied fields laid over the stored record, `fixed` kept from the record
fn overlay<R: Serialize>(stored: &R, supplied: &Map<String, Value>, fixed: &str) -> Result<Value> {
    let mut merged = serde_json::to_value(stored)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    if let Value::Object(target) = &mut merged {
        for (key, value) in supplied {
            if key != fixed {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(merged)
}

// ============================================================================
// TRANSACTIONAL IMPORT
// ============================================================================

/// All-or-nothing import; the first failure rolls back the whole batch
pub fn import_untersuchungen(db: &Database, payload: &Value) -> Result<ImportSummary> {
    let records = records(payload)?;

    let summary = db.with_transaction(|tx| {
        let mut summary = ImportSummary::default();
        for record in &records {
            import_record(tx, record, &mut summary)?;
        }
        Ok(summary)
    })?;

    info!(
        patients_created = summary.patients_created,
        patients_matched = summary.patients_matched,
        untersuchungen_created = summary.untersuchungen_created,
        untersuchungen_skipped = summary.untersuchungen_skipped,
        "import committed"
    );
    Ok(summary)
}

fn import_record(conn: &Connection, record: &ImportRecord<'_>, summary: &mut ImportSummary) -> Result<()> {
    let patient_value = record.patient.ok_or_else(|| missing("patient"))?;
    let data = patient_value.as_object().ok_or_else(|| missing("patient"))?;

    let nachname = text_key(data, "nachname").ok_or_else(|| missing("nachname"))?;
    let vorname = text_key(data, "vorname").ok_or_else(|| missing("vorname"))?;
    let geburtsdatum = date_key(data, "geburtsdatum").ok_or_else(|| missing("geburtsdatum"))?;
    let feuerwehr = id_key(data, "feuerwehr").ok_or_else(|| missing("feuerwehr"))?;

    let patient = match find_by_identity(conn, feuerwehr, &nachname, &vorname, geburtsdatum)? {
        Some(existing) => {
            summary.patients_matched += 1;
            existing
        }
        None => {
            summary.patients_created += 1;
            create_in::<Patient>(conn, patient_value)?
        }
    };

    for exam in record.untersuchungen {
        let mut exam = exam.clone();
        let object = exam.as_object_mut().ok_or_else(|| missing("untersuchungen"))?;
        object.insert("patient".to_string(), Value::from(patient.id));

        let date = date_key(object, "untersuchungsdatum")
            .ok_or_else(|| missing("untersuchungsdatum"))?;

        if find_by_patient_and_date(conn, patient.id, date)?.is_some() {
            summary.untersuchungen_skipped += 1;
        } else {
            create_in::<Untersuchung>(conn, &exam)?;
            summary.untersuchungen_created += 1;
        }
    }
    Ok(())
}

// ============================================================================
// UNIT-SCOPED IMPORT
// ============================================================================

/// Per-record upsert into one unit
///
/// Every patient and examination write runs in its own savepoint inside one
/// outer transaction. Rejected writes are rolled back to their savepoint and
/// reported; store failures abort the whole batch.
pub fn import_patienten(db: &Database, feuerwehr_id: i64, payload: &Value) -> Result<ImportReport> {
    let records = records(payload)?;

    let report = db.with_transaction(|tx| {
        if Feuerwehr::get(tx, feuerwehr_id)?.is_none() {
            return Err(AppError::not_found(Feuerwehr::NAME, feuerwehr_id));
        }

        let mut imported = Vec::new();
        let mut errors = Vec::new();

        for record in &records {
            let mut data = match record.patient {
                Some(Value::Object(object)) => object.clone(),
                _ => Map::new(),
            };
            data.insert("feuerwehr".to_string(), Value::from(feuerwehr_id));
            let vorname = text_key(&data, "vorname").unwrap_or_default();
            let nachname = text_key(&data, "nachname").unwrap_or_default();

            let patient = {
                let sp = tx.savepoint()?;
                match upsert_patient(&sp, feuerwehr_id, &data) {
                    Ok(patient) => {
                        sp.commit()?;
                        patient
                    }
                    Err(err) => match err.field_errors() {
                        Some(field_errors) => {
                            let message =
                                format!("Fehler bei Patient {} {}: {}", vorname, nachname, field_errors);
                            warn!(feuerwehr = feuerwehr_id, "{}", message);
                            errors.push(message);
                            continue;
                        }
                        None => return Err(err),
                    },
                }
            };

            for exam in record.untersuchungen {
                let sp = tx.savepoint()?;
                match upsert_untersuchung(&sp, patient.id, exam) {
                    Ok(_) => sp.commit()?,
                    Err(err) => match err.field_errors() {
                        Some(field_errors) => {
                            let message = format!(
                                "Fehler bei Untersuchung für Patient {} {}: {}",
                                patient.vorname, patient.nachname, field_errors
                            );
                            warn!(feuerwehr = feuerwehr_id, patient = patient.id, "{}", message);
                            errors.push(message);
                        }
                        None => return Err(err),
                    },
                }
            }

            imported.push(patient);
        }

        Ok(ImportReport {
            total_imported: imported.len(),
            total_errors: errors.len(),
            imported,
            errors,
        })
    })?;

    info!(
        feuerwehr = feuerwehr_id,
        imported = report.total_imported,
        errors = report.total_errors,
        "patient import finished"
    );
    Ok(report)
}

fn upsert_patient(conn: &Connection, feuerwehr_id: i64, data: &Map<String, Value>) -> Result<Patient> {
    let existing = match (
        text_key(data, "nachname"),
        text_key(data, "vorname"),
        date_key(data, "geburtsdatum"),
    ) {
        (Some(nachname), Some(vorname), Some(geburtsdatum)) => {
            find_by_identity(conn, feuerwehr_id, &nachname, &vorname, geburtsdatum)?
        }
        _ => None,
    };

    match existing {
        Some(stored) => {
            let merged = overlay(&stored, data, "feuerwehr")?;
            update_in::<Patient>(conn, stored.id, &merged)
        }
        None => create_in::<Patient>(conn, &Value::Object(data.clone())),
    }
}

fn upsert_untersuchung(conn: &Connection, patient_id: i64, exam: &Value) -> Result<Untersuchung> {
    let mut data = match exam {
        Value::Object(object) => object.clone(),
        other => return create_in::<Untersuchung>(conn, other),
    };
    data.insert("patient".to_string(), Value::from(patient_id));

    let existing = match date_key(&data, "untersuchungsdatum") {
        Some(date) => find_by_patient_and_date(conn, patient_id, date)?,
        None => None,
    };

    match existing {
        Some(stored) => {
            let merged = overlay(&stored, &data, "patient")?;
            update_in::<Untersuchung>(conn, stored.id, &merged)
        }
        None => create_in::<Untersuchung>(conn, &Value::Object(data)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
