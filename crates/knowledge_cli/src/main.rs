//! CLI entry point for the knowledge core.
//!
//! # Responsibility
//! - Confirm `knowledge_core` linkage (ping/version).
//! - Print the organizer outline of a database file.

use clap::Parser;
use knowledge_core::{
    default_log_level, init_logging, open_db, Operation, RecordStore, SqliteRecordStore, SyncConfig,
    Table, TreeSync,
};
use log::error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "knowledge_cli")]
#[command(version)]
#[command(about = "Prints the organizer outline of a knowledge database", long_about = None)]
struct Cli {
    /// Database file to read the outline from
    #[arg(long)]
    db: Option<PathBuf>,

    /// Absolute directory for rotating log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn print_outline(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_db(path)?;
    let store = SqliteRecordStore::try_new(&conn)?;
    let sync = TreeSync::new(&store, SyncConfig::default());
    let forest = sync.hydrate()?;

    if forest.is_empty() {
        println!("(empty)");
    }
    for entry in forest.outline() {
        let Some(node) = forest.node(&entry.id) else {
            continue;
        };
        let marker = if node.is_organizer() { "+" } else { "-" };
        println!(
            "{}{marker} {} [{}]",
            "  ".repeat(entry.depth),
            node.title,
            node.id
        );
    }
    println!(
        "nodes={} writable={}",
        forest.len(),
        store.has_permission(Table::Pages, Operation::Update)
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Some(dir) = &args.log_dir {
        if let Err(err) = init_logging(default_log_level(), dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    println!("knowledge_core ping={}", knowledge_core::ping());
    println!("knowledge_core version={}", knowledge_core::core_version());

    if let Some(path) = &args.db {
        if let Err(err) = print_outline(path) {
            error!("event=cli_outline module=cli status=error error={err}");
            eprintln!("cannot read `{}`: {err}", path.display());
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn flags_are_optional() {
        let cli = Cli::try_parse_from(["knowledge_cli"]).unwrap();
        assert!(cli.db.is_none());
        assert!(cli.log_dir.is_none());
    }

    #[test]
    fn db_and_log_dir_parse_as_paths() {
        let cli =
            Cli::try_parse_from(["knowledge_cli", "--db", "notes.db", "--log-dir", "/tmp/logs"])
                .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("notes.db")));
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/logs")));
    }

    #[test]
    fn unknown_flags_and_missing_values_are_rejected() {
        assert!(Cli::try_parse_from(["knowledge_cli", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["knowledge_cli", "--db"]).is_err());
    }

    #[test]
    fn help_is_served_by_clap() {
        let err = Cli::try_parse_from(["knowledge_cli", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
