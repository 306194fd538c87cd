//! Command line entry point for the term synchronizer.
//!
//! # Responsibility
//! - Sync one exported thesaurus record into a term store.
//! - Refresh stored terms from a directory of exported records.
//! - Print one stored term with its relationships.

use clap::{Parser, Subcommand};
use folksaurus_core::db::open_db;
use folksaurus_core::model::timestamp::unix_now;
use folksaurus_core::source::parse_term_payload;
use folksaurus_core::{
    core_version, init_logging_from_config, JsonDirSource, LocalTermId, Propagation,
    SqliteTermStore, SyncConfig, Taxonomy, TermRefresher, TermStore, TermSynchronizer,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "folksaurus")]
#[command(about = "Synchronize a local term store with the Folksaurus thesaurus")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(long, global = true, env = "FOLKSAURUS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite term store
    #[arg(long, global = true, env = "FOLKSAURUS_DB", default_value = "folksaurus.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save one exported term record
    Sync {
        /// JSON term record
        #[arg(long)]
        payload: PathBuf,
        /// Taxonomy for the term and its placeholders
        #[arg(long)]
        taxonomy: Option<String>,
        /// Known local id of the term
        #[arg(long)]
        local_id: Option<LocalTermId>,
    },
    /// Refresh stale terms from `<source-dir>/<external_id>.json`
    Refresh {
        #[arg(long)]
        source_dir: PathBuf,
        local_ids: Vec<LocalTermId>,
    },
    /// Print one stored term
    Show { local_id: LocalTermId },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match args.config.as_ref() {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    init_logging_from_config(&config.logging)?;
    info!(
        "event=cli_start module=cli status=ok version={} db={}",
        core_version(),
        args.db.display()
    );

    let conn = open_db(&args.db)?;
    let store = SqliteTermStore::try_new(&conn)?;
    let synchronizer = TermSynchronizer::with_config(store, &config);

    match args.command {
        Command::Sync {
            payload,
            taxonomy,
            local_id,
        } => {
            let json = std::fs::read_to_string(&payload)?;
            let mut term = parse_term_payload(&json, unix_now())?;
            term.local_id = local_id;
            term.taxonomy = Some(match taxonomy {
                Some(name) => name.parse::<Taxonomy>()?,
                None => config.default_taxonomy.clone(),
            });

            let report = synchronizer.save(&term)?;
            println!(
                "saved term {} (external {}) created={} edges={}",
                report.local_id, term.external_id, report.created, report.edges_written
            );
            for skipped in &report.skipped_references {
                println!(
                    "skipped {:?} reference {} `{}`: {}",
                    skipped.role,
                    skipped.reference.external_id,
                    skipped.reference.name,
                    skipped.reason
                );
            }
            if let Propagation::Repointed { moved, .. } = report.propagation {
                println!("moved {moved} content links to the preferred term");
            }
        }
        Command::Refresh {
            source_dir,
            local_ids,
        } => {
            let source = JsonDirSource::new(source_dir);
            let refresher = TermRefresher::with_config(&synchronizer, &source, &config);
            let report = refresher.refresh(&local_ids);
            println!(
                "refreshed={} fresh={} deleted={} unmatched={} failed={}",
                report.refreshed.len(),
                report.fresh.len(),
                report.deleted.len(),
                report.unmatched.len(),
                report.failed.len()
            );
        }
        Command::Show { local_id } => {
            let store = synchronizer.store();
            let Some(record) = store.get_term(local_id)? else {
                return Err(format!("term {local_id} not found").into());
            };
            let status = record.display_status().css_class().unwrap_or("-");
            println!(
                "{} `{}` slug={} status={}",
                record.local_id, record.name, record.slug, status
            );
            if let Some(term) = store.load_term(local_id)? {
                println!("external id: {}", term.external_id);
                if !term.scope_note.is_empty() {
                    println!("scope note: {}", term.scope_note);
                }
                for (label, references) in [
                    ("broader", &term.broader),
                    ("narrower", &term.narrower),
                    ("related", &term.related),
                    ("used for", &term.used_for),
                    ("use", &term.use_terms),
                ] {
                    for reference in references {
                        println!("  {label}: {} `{}`", reference.external_id, reference.name);
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Args, Command};
    use clap::{CommandFactory, Parser};
    use std::path::PathBuf;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_global_db_after_subcommand() {
        let args =
            Args::try_parse_from(["folksaurus", "show", "7", "--db", "terms.sqlite3"]).unwrap();
        assert_eq!(args.db, PathBuf::from("terms.sqlite3"));
        assert!(matches!(args.command, Command::Show { local_id: 7 }));
    }
}
