//! Command-line front end for the shelter record store.
//!
//! # Responsibility
//! - Parse JSON (MongoDB extended JSON) arguments into BSON documents.
//! - Run one record-store operation against MongoDB or an embedded file.
//! - Print results as relaxed extended JSON on stdout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shelter_core::bson::Bson;
use shelter_core::db::open_db;
use shelter_core::{
    default_log_level, init_logging, AnimalShelter, DocumentCollection, SqliteCollection,
    StoreConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_EMBEDDED_COLLECTION: &str = "animals";

#[derive(Debug, Parser)]
#[command(name = "shelter", version, about = "Animal shelter record store")]
struct Cli {
    /// Use an embedded SQLite file instead of the MongoDB server from the
    /// environment. It evaluates a subset of MongoDB operators ($eq..$lte,
    /// $in, $nin, $exists, $not, $regex, $and/$or/$nor; $set/$unset/$inc) and
    /// rejects the rest as unsupported.
    #[arg(long, global = true)]
    sqlite: Option<PathBuf>,

    /// Collection to operate on. Overrides SHELTER_MONGO_COLLECTION; the
    /// embedded store defaults to `animals`.
    #[arg(long, global = true)]
    collection: Option<String>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rolling log files.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the rec_num the next create would assign.
    NextRecNum,
    /// Insert one record.
    Create { record: String },
    /// Print every record matching a query.
    Read {
        #[arg(default_value = "{}")]
        query: String,
    },
    /// Apply a change document to every record matching a filter.
    Update { filter: String, change: String },
    /// Delete every record matching a query.
    Delete { query: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, &log_dir.to_string_lossy()) {
            eprintln!("warning: logging disabled: {err}");
        }
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.sqlite {
        Some(path) => {
            let conn = open_db(path)
                .with_context(|| format!("failed to open embedded store {}", path.display()))?;
            let name = cli
                .collection
                .as_deref()
                .unwrap_or(DEFAULT_EMBEDDED_COLLECTION);
            let collection = SqliteCollection::try_new(&conn, name)
                .with_context(|| format!("failed to bind collection `{name}`"))?;
            execute(&AnimalShelter::new(collection), &cli.command)
        }
        None => {
            let config = with_collection_override(
                StoreConfig::from_env().context("failed to load store configuration")?,
                cli.collection.as_deref(),
            );
            let shelter = AnimalShelter::connect(&config)
                .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?;
            execute(&shelter, &cli.command)
        }
    }
}

fn with_collection_override(mut config: StoreConfig, collection: Option<&str>) -> StoreConfig {
    if let Some(name) = collection {
        config.collection = name.to_string();
    }
    config
}

fn execute<C: DocumentCollection>(
    shelter: &AnimalShelter<C>,
    command: &Command,
) -> anyhow::Result<()> {
    match command {
        Command::NextRecNum => println!("{}", shelter.next_record_num()?),
        Command::Create { record } => {
            match shelter.create_record(parse_json("record", record)?)? {
                Some(id) => println!("{}", id.into_relaxed_extjson()),
                None => bail!("insert was not acknowledged"),
            }
        }
        Command::Read { query } => {
            let records = shelter.read(parse_json("query", query)?)?;
            let rendered: Vec<_> = records
                .into_iter()
                .map(|record| Bson::Document(record).into_relaxed_extjson())
                .collect();
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        Command::Update { filter, change } => {
            let modified =
                shelter.update(parse_json("filter", filter)?, parse_json("change", change)?)?;
            println!("{modified}");
        }
        Command::Delete { query } => println!("{}", shelter.delete(parse_json("query", query)?)?),
    }
    Ok(())
}

/// Parses an extended-JSON argument. `null` passes through so the record store
/// reports the missing argument itself.
fn parse_json(argument: &str, text: &str) -> anyhow::Result<Bson> {
    let value: serde_json::Value = serde_json::from_str(text)
        .with_context(|| format!("{argument} is not valid JSON"))?;
    Bson::try_from(value).with_context(|| format!("{argument} is not valid extended JSON"))
}
