// 📄 Export Service - one examination as an A4 PDF
//
// Read-only: loads examination, patient and unit, renders the document and
// hands back bytes plus a download filename. Nothing is written to the store.

use std::io::BufWriter;

use chrono::NaiveDate;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use tracing::info;

use crate::db::Database;
use crate::entities::{Feuerwehr, Patient, Resource, Untersuchung};
use crate::error::{AppError, Result};

const LEFT: f32 = 20.0;
const VALUE_COLUMN: f32 = 75.0;
const WRAP_WIDTH: usize = 85;

/// Rendered document ready to be sent or written to disk
#[derive(Debug, Clone)]
pub struct PdfExport {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// `Untersuchung_<nachname>_<vorname>_<YYYY-MM-DD>.pdf`
pub fn export_filename(patient: &Patient, untersuchung: &Untersuchung) -> String {
    format!(
        "Untersuchung_{}_{}_{}.pdf",
        patient.nachname,
        patient.vorname,
        untersuchung.untersuchungsdatum.format("%Y-%m-%d")
    )
}

pub fn export_untersuchung(db: &Database, id: i64) -> Result<PdfExport> {
    let (untersuchung, patient, feuerwehr) = db.with_conn(|conn| {
        let untersuchung = Untersuchung::get(conn, id)?
            .ok_or_else(|| AppError::not_found(Untersuchung::NAME, id))?;
        let patient = Patient::get(conn, untersuchung.patient)?
            .ok_or_else(|| AppError::not_found(Patient::NAME, untersuchung.patient))?;
        let feuerwehr = Feuerwehr::get(conn, patient.feuerwehr)?
            .ok_or_else(|| AppError::not_found(Feuerwehr::NAME, patient.feuerwehr))?;
        Ok((untersuchung, patient, feuerwehr))
    })?;

    let bytes = render_pdf(&feuerwehr, &patient, &untersuchung)?;
    let filename = export_filename(&patient, &untersuchung);
    info!(untersuchung = id, bytes = bytes.len(), %filename, "pdf rendered");

    Ok(PdfExport { filename, bytes })
}

fn display_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
    }
    lines
}

struct Cursor {
    layer: PdfLayerReference,
    y: Mm,
}

impl Cursor {
    fn heading(&mut self, text: &str, font: &IndirectFontRef) {
        self.layer.use_text(text, 12.0, Mm(LEFT), self.y, font);
        self.y -= Mm(7.0);
    }

    fn row(&mut self, label: &str, value: &str, bold: &IndirectFontRef, font: &IndirectFontRef) {
        self.layer.use_text(label, 10.0, Mm(LEFT), self.y, bold);
        self.layer.use_text(value, 10.0, Mm(VALUE_COLUMN), self.y, font);
        self.y -= Mm(5.5);
    }

    fn gap(&mut self, mm: f32) {
        self.y -= Mm(mm);
    }
}

pub fn render_pdf(feuerwehr: &Feuerwehr, patient: &Patient, untersuchung: &Untersuchung) -> Result<Vec<u8>> {
    let title = "Ärztliche Untersuchung";
    let (doc, page, layer) = PdfDocument::new(title, Mm(210.0), Mm(297.0), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| AppError::Pdf(format!("font error: {e}")))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| AppError::Pdf(format!("font error: {e}")))?;

    let mut cursor = Cursor {
        layer: doc.get_page(page).get_layer(layer),
        y: Mm(275.0),
    };

    cursor.layer.use_text(title, 16.0, Mm(LEFT), cursor.y, &bold);
    cursor.gap(8.0);
    cursor
        .layer
        .use_text(format!("Feuerwehr: {}", feuerwehr.name), 11.0, Mm(LEFT), cursor.y, &font);
    cursor.gap(12.0);

    cursor.heading("Patient", &bold);
    cursor.row("Name:", &patient.display_name(), &bold, &font);
    cursor.row("Geburtsdatum:", &display_date(patient.geburtsdatum), &bold, &font);
    cursor.row("Geschlecht:", patient.geschlecht.label(), &bold, &font);
    cursor.row("Anschrift:", &patient.strasse, &bold, &font);
    cursor.row("", &format!("{} {}", patient.plz, patient.ort), &bold, &font);
    cursor.gap(6.0);

    cursor.heading("Untersuchung", &bold);
    cursor.row("Datum:", &display_date(untersuchung.untersuchungsdatum), &bold, &font);
    cursor.row("Art:", untersuchung.typ_label(), &bold, &font);
    cursor.row("Bewertung:", untersuchung.bewertung.label(), &bold, &font);
    let naechste = untersuchung
        .naechste_untersuchung
        .map(display_date)
        .unwrap_or_else(|| "-".to_string());
    cursor.row("Nächste Untersuchung:", &naechste, &bold, &font);

    if let Some(bemerkungen) = untersuchung.bemerkungen.as_deref().filter(|b| !b.trim().is_empty()) {
        cursor.gap(4.0);
        cursor.heading("Bemerkungen", &bold);
        for line in wrap_text(bemerkungen, WRAP_WIDTH) {
            cursor.layer.use_text(line, 10.0, Mm(LEFT), cursor.y, &font);
            cursor.gap(5.0);
        }
    }

    // Signature line sits at a fixed height near the page bottom
    let signature_y = Mm(40.0);
    cursor
        .layer
        .use_text("_______________________________", 10.0, Mm(LEFT), signature_y, &font);
    cursor.layer.use_text(
        "Datum, Unterschrift Arzt/Ärztin",
        9.0,
        Mm(LEFT),
        signature_y - Mm(5.0),
        &font,
    );

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| AppError::Pdf(format!("save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| AppError::Pdf(format!("buffer error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service;
    use serde_json::json;

    fn seeded() -> (Database, Untersuchung) {
        let db = Database::open_in_memory().unwrap();
        let unit = service::create::<Feuerwehr>(&db, &json!({ "name": "FF Musterstadt" })).unwrap();
        let patient = service::create::<Patient>(
            &db,
            &json!({
                "feuerwehr": unit.id,
                "nachname": "Müller",
                "vorname": "Jörg",
                "geburtsdatum": "1980-03-04",
                "geschlecht": "M",
                "strasse": "Hauptstraße 1",
                "plz": "12345",
                "ort": "Musterstadt"
            }),
        )
        .unwrap();
        let exam = service::create::<Untersuchung>(
            &db,
            &json!({
                "patient": patient.id,
                "untersuchungsdatum": "2024-01-15",
                "naechste_untersuchung": "2027-01-15",
                "nachuntersuchung": true,
                "bewertung": "BEDINGT",
                "bemerkungen": "Brille beim Einsatz tragen. Kontrolle in drei Jahren."
            }),
        )
        .unwrap();
        (db, exam)
    }

    #[test]
    fn test_export_renders_pdf() {
        let (db, exam) = seeded();
        let export = export_untersuchung(&db, exam.id).unwrap();

        assert_eq!(export.filename, "Untersuchung_Müller_Jörg_2024-01-15.pdf");
        assert!(export.bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_export_unknown_id() {
        let (db, _) = seeded();
        let err = export_untersuchung(&db, 999).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("eins zwei drei vier", 9);
        assert_eq!(lines, vec!["eins zwei", "drei vier"]);
        assert_eq!(wrap_text("a\nb", 80), vec!["a", "b"]);
    }
}
