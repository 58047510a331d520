#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use feuerwehr_records::api::{router, AppState};
use feuerwehr_records::Database;

fn app() -> Router {
    let state = AppState {
        db: Database::open_in_memory().unwrap(),
        page_size: 100,
    };
    router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed_unit(app: &Router) -> i64 {
    let (status, unit) = send_json(app, Method::POST, "/api/feuerwehren/", Some(json!({ "name": "FF Musterstadt" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    unit["id"].as_i64().unwrap()
}

fn patient_json(feuerwehr: i64) -> Value {
    json!({
        "feuerwehr": feuerwehr,
        "nachname": "Muster",
        "vorname": "Max",
        "geburtsdatum": "1990-01-01",
        "geschlecht": "M",
        "strasse": "Hauptstraße 1",
        "plz": "12345",
        "ort": "Musterstadt"
    })
}

async fn seed_patient(app: &Router, feuerwehr: i64) -> i64 {
    let (status, patient) = send_json(app, Method::POST, "/api/patienten/", Some(patient_json(feuerwehr))).await;
    assert_eq!(status, StatusCode::CREATED);
    patient["id"].as_i64().unwrap()
}

fn exam_json(patient: i64, date: &str) -> Value {
    json!({
        "patient": patient,
        "untersuchungsdatum": date,
        "erstuntersuchung": true,
        "nachuntersuchung": false,
        "bewertung": "JA"
    })
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send_json(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "data": "OK" }));
}

#[tokio::test]
async fn test_feuerwehr_crud_with_and_without_trailing_slash() {
    let app = app();
    let id = seed_unit(&app).await;

    let (status, unit) = send_json(&app, Method::GET, &format!("/api/feuerwehren/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unit["name"], "FF Musterstadt");
    assert_eq!(unit["kostentraeger"], Value::Null);

    let (status, updated) = send_json(
        &app,
        Method::PUT,
        &format!("/api/feuerwehren/{}/", id),
        Some(json!({ "name": "FF Neustadt" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "FF Neustadt");
    assert_eq!(updated["created_at"], unit["created_at"]);

    let (status, list) = send_json(&app, Method::GET, "/api/feuerwehren", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["next"], Value::Null);
    assert_eq!(list["results"][0]["id"], id);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/feuerwehren/{}/", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send_json(&app, Method::GET, &format!("/api/feuerwehren/{}/", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Nicht gefunden.");
}

#[tokio::test]
async fn test_validation_errors_per_field() {
    let app = app();
    let (status, body) = send_json(&app, Method::POST, "/api/patienten/", Some(json!({ "nachname": "" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["nachname"][0], "Dieses Feld darf nicht leer sein.");
    assert_eq!(body["vorname"][0], "Dieses Feld ist zwingend erforderlich.");
    assert!(body.get("feuerwehr").is_some());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/feuerwehren/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_reference_rejected() {
    let app = app();
    let (status, body) = send_json(&app, Method::POST, "/api/patienten/", Some(patient_json(77))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["feuerwehr"][0], "Ungültiger pk \"77\" - Objekt existiert nicht.");
}

#[tokio::test]
async fn test_patient_filter_by_unit() {
    let app = app();
    let a = seed_unit(&app).await;
    let b = seed_unit(&app).await;
    seed_patient(&app, a).await;
    seed_patient(&app, b).await;
    seed_patient(&app, b).await;

    let (_, all) = send_json(&app, Method::GET, "/api/patienten/", None).await;
    assert_eq!(all["count"], 3);

    let (_, filtered) = send_json(&app, Method::GET, &format!("/api/patienten/?feuerwehr={}", b), None).await;
    assert_eq!(filtered["count"], 2);
    assert!(filtered["results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|p| p["feuerwehr"] == b));
}

#[tokio::test]
async fn test_empty_filter_value_lists_everything() {
    let app = app();
    let unit = seed_unit(&app).await;
    let patient = seed_patient(&app, unit).await;
    let (status, _) = send_json(&app, Method::POST, "/api/untersuchungen/", Some(exam_json(patient, "2024-05-01"))).await;
    assert_eq!(status, StatusCode::CREATED);

    for uri in [
        "/api/patienten/?feuerwehr=",
        "/api/untersuchungen/?patient=",
        "/api/feuerwehren/?kostentraeger=",
        "/api/kontaktpersonen/?kostentraeger=",
    ] {
        let (status, page) = send_json(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert!(page["count"].is_number(), "{}", uri);
    }

    let (_, patients) = send_json(&app, Method::GET, "/api/patienten/?feuerwehr=", None).await;
    assert_eq!(patients["count"], 1);
    let (_, exams) = send_json(&app, Method::GET, "/api/untersuchungen/?patient=", None).await;
    assert_eq!(exams["count"], 1);

    let (status, _) = send_json(&app, Method::GET, "/api/patienten/?feuerwehr=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pagination_envelope() {
    let app = app();
    for _ in 0..3 {
        seed_unit(&app).await;
    }

    let (status, page) = send_json(&app, Method::GET, "/api/feuerwehren/?page_size=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["count"], 3);
    assert_eq!(page["results"].as_array().unwrap().len(), 2);
    assert_eq!(page["next"], "/api/feuerwehren/?page_size=2&page=2");
    assert_eq!(page["previous"], Value::Null);

    let (status, _) = send_json(&app, Method::GET, "/api/feuerwehren/?page=9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exam_type_exclusivity_and_duplicate_date() {
    let app = app();
    let unit = seed_unit(&app).await;
    let patient = seed_patient(&app, unit).await;

    let mut both = exam_json(patient, "2024-01-15");
    both["nachuntersuchung"] = json!(true);
    let (status, body) = send_json(&app, Method::POST, "/api/untersuchungen/", Some(both)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["non_field_errors"][0],
        "Es kann nur ein Untersuchungstyp (Erstuntersuchung oder Nachuntersuchung) ausgewählt werden."
    );

    let (status, _) = send_json(&app, Method::POST, "/api/untersuchungen/", Some(exam_json(patient, "2024-01-15"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(&app, Method::POST, "/api/untersuchungen/", Some(exam_json(patient, "2024-01-15"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["non_field_errors"].is_array());
}

#[tokio::test]
async fn test_delete_unit_cascades_to_exams() {
    let app = app();
    let unit = seed_unit(&app).await;
    let patient = seed_patient(&app, unit).await;
    let (_, exam) = send_json(&app, Method::POST, "/api/untersuchungen/", Some(exam_json(patient, "2024-01-15"))).await;
    let exam_id = exam["id"].as_i64().unwrap();

    let (status, _) = send(&app, Method::DELETE, &format!("/api/feuerwehren/{}/", unit), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, &format!("/api/patienten/{}/", patient), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, &format!("/api/untersuchungen/{}/", exam_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_kostentraeger_embeds_contacts() {
    let app = app();
    let (status, bearer) = send_json(
        &app,
        Method::POST,
        "/api/kostentraeger/",
        Some(json!({
            "firma": "Gemeinde Musterstadt",
            "strasse": "Rathausplatz 1",
            "plz": "12345",
            "ort": "Musterstadt"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let bearer_id = bearer["id"].as_i64().unwrap();

    let (status, contact) = send_json(
        &app,
        Method::POST,
        "/api/kontaktpersonen/",
        Some(json!({
            "kostentraeger": bearer_id,
            "nachname": "Schmidt",
            "vorname": "Erika",
            "email": "erika@musterstadt.de"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, loaded) = send_json(&app, Method::GET, &format!("/api/kostentraeger/{}/", bearer_id), None).await;
    assert_eq!(loaded["kontaktpersonen"][0]["id"], contact["id"]);

    let (_, filtered) = send_json(
        &app,
        Method::GET,
        &format!("/api/kontaktpersonen/?kostentraeger={}", bearer_id),
        None,
    )
    .await;
    assert_eq!(filtered["count"], 1);
}

#[tokio::test]
async fn test_pdf_export() {
    let app = app();
    let (status, body) = send_json(&app, Method::GET, "/api/untersuchungen/999/pdf/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Nicht gefunden.");

    let unit = seed_unit(&app).await;
    let patient = seed_patient(&app, unit).await;
    let (_, exam) = send_json(&app, Method::POST, "/api/untersuchungen/", Some(exam_json(patient, "2024-01-15"))).await;

    let request = Request::builder()
        .uri(format!("/api/untersuchungen/{}/pdf/", exam["id"]))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("filename=\"Untersuchung_Muster_Max_2024-01-15.pdf\""));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_import_json_is_idempotent() {
    let app = app();
    let unit = seed_unit(&app).await;
    let mut exam = exam_json(0, "2024-01-15");
    exam.as_object_mut().unwrap().remove("patient");
    let payload = json!([{ "patient": patient_json(unit), "untersuchungen": [exam] }]);

    for _ in 0..2 {
        let (status, body) = send_json(&app, Method::POST, "/api/untersuchungen/import_json/", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Daten erfolgreich importiert");
    }

    let (_, patients) = send_json(&app, Method::GET, "/api/patienten/", None).await;
    let (_, exams) = send_json(&app, Method::GET, "/api/untersuchungen/", None).await;
    assert_eq!(patients["count"], 1);
    assert_eq!(exams["count"], 1);
}

#[tokio::test]
async fn test_import_json_failure_rolls_back() {
    let app = app();
    let unit = seed_unit(&app).await;
    let payload = json!([
        { "patient": patient_json(unit), "untersuchungen": [] },
        { "patient": { "nachname": "Beispiel" } }
    ]);

    let (status, body) = send_json(&app, Method::POST, "/api/untersuchungen/import_json", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, patients) = send_json(&app, Method::GET, "/api/patienten/", None).await;
    assert_eq!(patients["count"], 0);
}

#[tokio::test]
async fn test_import_patienten_scenario() {
    let app = app();
    let unit = seed_unit(&app).await;
    let uri = format!("/api/feuerwehr/{}/import-patienten/", unit);
    let mut patient = patient_json(unit);
    patient.as_object_mut().unwrap().remove("feuerwehr");
    let payload = json!({
        "patient": patient,
        "untersuchungen": [{
            "untersuchungsdatum": "2024-01-15",
            "erstuntersuchung": true,
            "bewertung": "JA"
        }]
    });

    let (status, report) = send_json(&app, Method::POST, &uri, Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_imported"], 1);
    assert_eq!(report["total_errors"], 0);
    assert_eq!(report["imported"][0]["feuerwehr"], unit);

    let mut resubmit = payload;
    resubmit["patient"]["ort"] = json!("Neustadt");
    let (status, report) = send_json(&app, Method::POST, &uri, Some(resubmit)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["imported"][0]["ort"], "Neustadt");

    let (_, patients) = send_json(&app, Method::GET, "/api/patienten/", None).await;
    let (_, exams) = send_json(&app, Method::GET, "/api/untersuchungen/", None).await;
    assert_eq!(patients["count"], 1);
    assert_eq!(exams["count"], 1);
}

#[tokio::test]
async fn test_import_patienten_unknown_unit() {
    let app = app();
    let (status, body) = send_json(&app, Method::POST, "/api/feuerwehr/404/import-patienten/", Some(json!([]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Feuerwehr nicht gefunden.");
}
