// 🌐 REST API - axum router over the services
//
// Every route lives under /api and answers with or without a trailing slash.
// Handlers lock the store through the services; nothing is held across an
// await point.

use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, rejection::QueryRejection, OriginalUri, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::db::Database;
use crate::entities::{Feuerwehr, Kontaktperson, Kostentraeger, Patient, Resource, Untersuchung};
use crate::error::AppError;
use crate::export;
use crate::import::{self, MSG_IMPORTED, MSG_UNIT_NOT_FOUND};
use crate::service::{self, PageParams};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Default list page size
    pub page_size: usize,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

type ApiResult = Result<Response, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => (StatusCode::BAD_REQUEST, Json(errors)).into_response(),
            AppError::Conflict(errors) => (StatusCode::CONFLICT, Json(errors)).into_response(),
            AppError::NotFound { .. } => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": "Nicht gefunden." }))).into_response()
            }
            AppError::InvalidPage(_) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": "Ungültige Seite." }))).into_response()
            }
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": message }))).into_response()
            }
            other => {
                error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": other.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

// ============================================================================
// Request helpers
// ============================================================================

/// Empty body reads as an empty object so validation can name missing fields
fn parse_body(body: &Bytes) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("JSON parse error - {}", e)))
}

fn path_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    id.map(|Path(id)| id)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

fn query<T>(value: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    value
        .map(|Query(inner)| inner)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Same path and query, with `page` pointing elsewhere
fn page_link(uri: &axum::http::Uri, page: usize) -> String {
    let mut pairs: Vec<&str> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("page="))
        .collect();
    let page_pair = format!("page={}", page);
    pairs.push(&page_pair);
    format!("{}?{}", uri.path(), pairs.join("&"))
}

/// ASCII stand-in for the quoted `filename=` parameter
fn ascii_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'Ä' => out.push_str("Ae"),
            'Ö' => out.push_str("Oe"),
            'Ü' => out.push_str("Ue"),
            'ß' => out.push_str("ss"),
            '"' | '\\' => out.push('_'),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_filename(filename),
        urlencoding::encode(filename)
    )
}

// ============================================================================
// CRUD handlers (generic over the entity)
// ============================================================================

async fn list_records<R>(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    filter: Result<Query<R::Filter>, QueryRejection>,
    page: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult
where
    R: Resource + Send + 'static,
    R::Filter: DeserializeOwned + Send + 'static,
{
    let filter = query(filter)?;
    let params = query(page)?;
    let records = service::list::<R>(&state.db, &filter)?;
    let page = service::paginate(records, params, state.page_size, |n| page_link(&uri, n))?;
    Ok(Json(page).into_response())
}

async fn create_record<R>(State(state): State<AppState>, body: Bytes) -> ApiResult
where
    R: Resource + Send + 'static,
{
    let payload = parse_body(&body)?;
    let record = service::create::<R>(&state.db, &payload)?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn retrieve_record<R>(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult
where
    R: Resource + Send + 'static,
{
    let record = service::retrieve::<R>(&state.db, path_id(id)?)?;
    Ok(Json(record).into_response())
}

async fn update_record<R>(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> ApiResult
where
    R: Resource + Send + 'static,
{
    let id = path_id(id)?;
    let payload = parse_body(&body)?;
    let record = service::update::<R>(&state.db, id, &payload)?;
    Ok(Json(record).into_response())
}

async fn delete_record<R>(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult
where
    R: Resource + Send + 'static,
{
    service::delete::<R>(&state.db, path_id(id)?)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ============================================================================
// Export and import handlers
// ============================================================================

/// GET /api/untersuchungen/:id/pdf - download one examination
async fn untersuchung_pdf(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let pdf = export::export_untersuchung(&state.db, path_id(id)?)?;
    let disposition = HeaderValue::from_str(&content_disposition(&pdf.filename))
        .map_err(|e| AppError::Pdf(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf.bytes,
    )
        .into_response())
}

/// POST /api/untersuchungen/import_json - all-or-nothing import
async fn import_json(State(state): State<AppState>, body: Bytes) -> Response {
    let outcome = parse_body(&body).and_then(|payload| import::import_untersuchungen(&state.db, &payload));
    match outcome {
        Ok(_) => (StatusCode::CREATED, Json(json!({ "message": MSG_IMPORTED }))).into_response(),
        Err(err) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.detail() }))).into_response()
        }
    }
}

/// POST /api/feuerwehr/:feuerwehr_id/import-patienten - per-record upsert into one unit
async fn import_patienten(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> ApiResult {
    let feuerwehr_id = path_id(id)?;
    let payload = parse_body(&body)?;
    match import::import_patienten(&state.db, feuerwehr_id, &payload) {
        Ok(report) => Ok(Json(report).into_response()),
        Err(err) if err.is_not_found() => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": MSG_UNIT_NOT_FOUND })),
        )
            .into_response()),
        Err(err) => Err(err),
    }
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

// ============================================================================
// Router
// ============================================================================

/// Register `route` at `path` and at `path/`
fn both(router: Router<AppState>, path: &str, route: MethodRouter<AppState>) -> Router<AppState> {
    router
        .route(path, route.clone())
        .route(&format!("{}/", path), route)
}

fn resource_routes<R>(router: Router<AppState>, base: &str) -> Router<AppState>
where
    R: Resource + Send + 'static,
    R::Filter: DeserializeOwned + Send + 'static,
{
    let collection = get(list_records::<R>).post(create_record::<R>);
    let item = get(retrieve_record::<R>)
        .put(update_record::<R>)
        .delete(delete_record::<R>);

    let router = both(router, base, collection);
    both(router, &format!("{}/:id", base), item)
}

pub fn router(state: AppState) -> Router {
    let mut api = Router::new();
    api = both(api, "/health", get(health_check));
    api = resource_routes::<Feuerwehr>(api, "/feuerwehren");
    api = resource_routes::<Patient>(api, "/patienten");
    api = resource_routes::<Untersuchung>(api, "/untersuchungen");
    api = resource_routes::<Kostentraeger>(api, "/kostentraeger");
    api = resource_routes::<Kontaktperson>(api, "/kontaktpersonen");
    api = both(api, "/untersuchungen/:id/pdf", get(untersuchung_pdf));
    api = both(api, "/untersuchungen/import_json", post(import_json));
    api = both(
        api,
        "/feuerwehr/:feuerwehr_id/import-patienten",
        post(import_patienten),
    );

    Router::new()
        .nest("/api", api.with_state(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
