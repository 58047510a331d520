use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use feuerwehr_records::{
    export_untersuchung, import_patienten, import_untersuchungen, logging, Config, Database,
};

#[derive(Parser)]
#[command(name = "feuerwehr-records", version, about = "Feuerwehr examination records")]
struct Cli {
    /// Database file (overrides configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Import patients and examinations from a JSON file
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Upsert into this unit instead of the all-or-nothing import
        #[arg(long)]
        feuerwehr: Option<i64>,
    },
    /// Render one examination to PDF
    Pdf {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);

    let db_path = cli.db.unwrap_or(config.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;

    match cli.command {
        Command::Init => {
            println!("✓ Database ready: {:?}", db_path);
        }
        Command::Import { file, feuerwehr } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("Import file is not valid JSON")?;

            match feuerwehr {
                Some(id) => {
                    let report = import_patienten(&db, id, &payload)?;
                    println!("✓ Imported {} patients", report.total_imported);
                    for message in &report.errors {
                        eprintln!("  ⚠️  {}", message);
                    }
                }
                None => {
                    let summary = import_untersuchungen(&db, &payload)?;
                    println!(
                        "✓ Patients: {} created, {} matched",
                        summary.patients_created, summary.patients_matched
                    );
                    println!(
                        "✓ Examinations: {} created, {} already present",
                        summary.untersuchungen_created, summary.untersuchungen_skipped
                    );
                }
            }
        }
        Command::Pdf { id, out } => {
            let pdf = export_untersuchung(&db, id)?;
            fs::create_dir_all(&out).with_context(|| format!("Failed to create {:?}", out))?;
            let target = out.join(&pdf.filename);
            fs::write(&target, &pdf.bytes)
                .with_context(|| format!("Failed to write {:?}", target))?;
            println!("📄 Wrote {:?}", target);
        }
    }

    Ok(())
}
