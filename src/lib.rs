// Feuerwehr Records - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod service;
pub mod validation;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::Config;
pub use db::{setup_database, Database};
pub use entities::{
    Bewertung, Feuerwehr, FeuerwehrFilter, Geschlecht, Kontaktperson, KontaktpersonFilter,
    Kostentraeger, KostentraegerFilter, Patient, PatientFilter, Resource, Untersuchung,
    UntersuchungFilter,
};
pub use error::{AppError, FieldErrors, Result};
pub use export::{export_untersuchung, PdfExport};
pub use import::{import_patienten, import_untersuchungen, ImportReport, ImportSummary};
pub use service::{Page, PageParams};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
