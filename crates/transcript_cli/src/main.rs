//! Transcription store inspector.
//!
//! # Responsibility
//! - Verify `transcript_core` linkage and print the crate version.
//! - Print the outline and status summary of one acte from a store file.
//!
//! Usage: `transcript_cli [DB_PATH] [ACTE_ID]`. `DB_PATH` falls back to
//! `TRANSCRIPT_DB_PATH`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use transcript_core::db::open_db;
use transcript_core::{
    init_logging_from_config, load_tree, CoreConfig, LevelSummary, SqliteTranscriptionStore,
    Status, TranscriptionTree,
};
use uuid::Uuid;

fn main() -> ExitCode {
    println!("transcript_core version={}", transcript_core::core_version());

    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = init_logging_from_config(&config) {
        eprintln!("logging disabled: {err}");
    }

    let mut args = std::env::args().skip(1);
    let db_path = args.next().map(PathBuf::from).or(config.db_path);
    let acte = args.next();
    let (Some(db_path), Some(acte)) = (db_path, acte) else {
        return ExitCode::SUCCESS;
    };

    match inspect(&db_path, &acte) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("event=cli_inspect module=cli status=error error={err}");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn inspect(db_path: &Path, acte: &str) -> Result<(), Box<dyn std::error::Error>> {
    let acte_id = Uuid::parse_str(acte)?;
    let conn = open_db(db_path)?;
    let store = SqliteTranscriptionStore::try_new(&conn)?;
    let tree = load_tree(&store, acte_id)?;
    print_outline(&tree);
    Ok(())
}

fn print_outline(tree: &TranscriptionTree) {
    println!("acte {}", tree.acte_id);
    for document in &tree.documents {
        println!(
            "{}. {} [{}]",
            document.position,
            document.title,
            status_label(document.status)
        );
        for section in &document.sections {
            println!(
                "  {}.{} {} [{}]",
                document.position,
                section.position,
                section.title,
                status_label(section.status)
            );
            for bloc in &section.blocs {
                println!(
                    "    - {} [{}] {}",
                    bloc.kind.as_str(),
                    status_label(bloc.status),
                    preview(&bloc.content)
                );
            }
        }
    }

    let summary = tree.status_summary();
    print_level("documents", summary.documents);
    print_level("sections", summary.sections);
    print_level("blocs", summary.blocs);
}

fn print_level(name: &str, level: LevelSummary) {
    println!(
        "{name}: total={} draft={} in_progress={} done={} unset={}",
        level.total, level.draft, level.in_progress, level.done, level.unset
    );
}

fn status_label(status: Option<Status>) -> &'static str {
    status.map_or("unset", Status::as_str)
}

fn preview(content: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_CHARS {
        let truncated: String = line.chars().take(MAX_CHARS).collect();
        format!("{truncated}…")
    } else {
        line.to_string()
    }
}
