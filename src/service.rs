// 🗂️ CRUD Service - create / list / retrieve / update / delete for every entity
//
// Works over the `Resource` trait so the five entity types share one code path.
// Writes run inside a single transaction: parse, validate, then persist, so a
// rejected payload never leaves a partial write behind.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::db::Database;
use crate::entities::Resource;
use crate::error::{AppError, Result};

/// Upper bound for `page_size`
pub const MAX_PAGE_SIZE: usize = 1000;

pub fn create<R: Resource>(db: &Database, payload: &Value) -> Result<R> {
    db.with_transaction(|tx| create_in::<R>(tx, payload))
}

/// Create inside a caller-owned transaction or savepoint
pub fn create_in<R: Resource>(conn: &Connection, payload: &Value) -> Result<R> {
    let input = R::parse(payload)?;
    R::validate(conn, &input, None)?;
    let record = R::insert(conn, &input)?;
    info!(entity = R::NAME, id = record.id(), "created");
    Ok(record)
}

pub fn retrieve<R: Resource>(db: &Database, id: i64) -> Result<R> {
    db.with_conn(|conn| R::get(conn, id)?.ok_or_else(|| AppError::not_found(R::NAME, id)))
}

pub fn list<R: Resource>(db: &Database, filter: &R::Filter) -> Result<Vec<R>> {
    db.with_conn(|conn| R::list(conn, filter))
}

/// Full update: every writable field comes from the payload
pub fn update<R: Resource>(db: &Database, id: i64, payload: &Value) -> Result<R> {
    db.with_transaction(|tx| update_in::<R>(tx, id, payload))
}

pub fn update_in<R: Resource>(conn: &Connection, id: i64, payload: &Value) -> Result<R> {
    if R::get(conn, id)?.is_none() {
        return Err(AppError::not_found(R::NAME, id));
    }
    let input = R::parse(payload)?;
    R::validate(conn, &input, Some(id))?;
    let record = R::replace(conn, id, &input)?;
    info!(entity = R::NAME, id, "updated");
    Ok(record)
}

/// Delete a record together with everything it owns
pub fn delete<R: Resource>(db: &Database, id: i64) -> Result<()> {
    db.with_transaction(|tx| R::remove(tx, id))?;
    info!(entity = R::NAME, id, "deleted");
    Ok(())
}

// ============================================================================
// PAGINATION
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// List envelope: `{count, next, previous, results}`
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl PageParams {
    /// Effective page size, clamped to `1..=MAX_PAGE_SIZE`
    pub fn size(&self, default_size: usize) -> usize {
        self.page_size
            .unwrap_or(default_size)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn number(&self) -> usize {
        self.page.unwrap_or(1)
    }
}

/// Cut one page out of `items`
///
/// `link` builds the URL for a neighbouring page number. Page 1 of an empty
/// list is valid; any other page past the end is rejected.
pub fn paginate<T, F>(items: Vec<T>, params: PageParams, default_size: usize, link: F) -> Result<Page<T>>
where
    F: Fn(usize) -> String,
{
    let size = params.size(default_size);
    let number = params.number();
    let count = items.len();
    let pages = count.div_ceil(size).max(1);

    if number == 0 || number > pages {
        return Err(AppError::InvalidPage(number));
    }

    let results: Vec<T> = items
        .into_iter()
        .skip((number - 1) * size)
        .take(size)
        .collect();

    Ok(Page {
        count,
        next: (number < pages).then(|| link(number + 1)),
        previous: (number > 1).then(|| link(number - 1)),
        results,
    })
}

// ============================================================================
// TESTS
// ============================================================================
