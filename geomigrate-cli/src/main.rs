//! Command line front end for geomigrate.
//!
//! Applies one migration script (or an up/down pair) against a PostgreSQL database and inspects
//! the result. The connection comes from `--database-url`, `DATABASE_URL`, or the `DB_*`
//! variables, any of which may live in a `.env` file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use geomigrate::config;
use geomigrate::postgres::PostgresApplicator;
use geomigrate::script::{list_scripts, ScriptMigration, MIGRATIONS_DIR};
use geomigrate::verify::SchemaVerifier;
use geomigrate::{AppliedMigration, Direction};
use postgres::{Client, NoTls};

#[derive(Parser)]
#[command(name = "geomigrate", version, about = "Apply and verify PostgreSQL/PostGIS migration scripts")]
struct CliArgs {
    /// Connection URL or key=value string; falls back to the DB_* variables when unset
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply one script file; the direction comes from its name (.up.sql / .down.sql)
    Apply {
        path: PathBuf,
    },
    /// Apply the up script of a migration, e.g. 000023_convert_structures_position_to_geometry
    Up {
        stem: String,
        #[arg(long, default_value = MIGRATIONS_DIR)]
        dir: PathBuf,
    },
    /// Apply the down script of a migration
    Down {
        stem: String,
        #[arg(long, default_value = MIGRATIONS_DIR)]
        dir: PathBuf,
    },
    /// Show the type, geometry metadata and index of a column
    Inspect {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        index: Option<String>,
    },
    /// Print the schema of the public tables as JSON
    Snapshot {
        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },
    /// List the migration scripts in a directory
    List {
        #[arg(long, default_value = MIGRATIONS_DIR)]
        dir: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = config::load_dotenv();
    init_tracing();
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    // Parse args first - this allows --help to work without a database
    let args = CliArgs::parse();

    // Commands that don't need a database connection
    let command = match args.command {
        Commands::List { dir } => return list(&dir),
        command => command,
    };

    let pg_config = config::resolve_connection(args.database_url.as_deref())?;
    tracing::debug!(hosts = ?pg_config.get_hosts(), dbname = ?pg_config.get_dbname(), "Connecting");
    let mut client = pg_config.connect(NoTls)?;
    let applicator = cli_applicator();

    match command {
        Commands::Apply { path } => {
            let applied = applicator.apply_file(&mut client, &path)?;
            print_applied(&applied, false);
        }
        Commands::Up { stem, dir } => {
            run_pair(&applicator, &mut client, &dir, &stem, Direction::Up)?;
        }
        Commands::Down { stem, dir } => {
            run_pair(&applicator, &mut client, &dir, &stem, Direction::Down)?;
        }
        Commands::Inspect {
            table,
            column,
            index,
        } => inspect(&mut client, &table, &column, index.as_deref())?,
        Commands::Snapshot { table } => {
            let mut verifier = SchemaVerifier::new(&mut client);
            let json = match table {
                Some(table) => {
                    verifier.assert_table_exists(&table)?;
                    serde_json::to_string_pretty(&verifier.capture_table(&table)?)?
                }
                None => serde_json::to_string_pretty(&verifier.capture_schema()?)?,
            };
            println!("{}", json);
        }
        Commands::List { dir } => list(&dir)?,
    }

    Ok(())
}

fn list(dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let scripts = list_scripts(dir)?;
    if scripts.is_empty() {
        println!("No migration scripts in {}.", dir.display());
    } else {
        println!("Migration scripts ({}):", scripts.len());
        for script in scripts {
            println!("  v{}: {} ({})", script.version, script.name, script.direction);
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("geomigrate=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cli_applicator() -> PostgresApplicator {
    PostgresApplicator::new().on_migration_error(|version, name, error| {
        tracing::error!(version, name, error = %error, "Migration failed, changes rolled back");
    })
}

fn run_pair(
    applicator: &PostgresApplicator,
    client: &mut Client,
    dir: &std::path::Path,
    stem: &str,
    direction: Direction,
) -> Result<(), Box<dyn std::error::Error>> {
    let migration = ScriptMigration::load(dir, stem)?;
    let report = applicator.apply(client, &migration, direction)?;
    let skipped = report.skipped;
    let applied = report.into_result()?;
    print_applied(&applied, skipped);
    Ok(())
}

fn print_applied(applied: &AppliedMigration, skipped: bool) {
    let verb = match (skipped, applied.direction) {
        (true, _) => "Already satisfied",
        (false, Direction::Up) => "Applied",
        (false, Direction::Down) => "Rolled back",
    };
    println!(
        "{} v{}: {} ({}) in {:?}",
        verb, applied.version, applied.name, applied.direction, applied.duration
    );
    println!("  checksum: {}", applied.checksum);
    println!("  at: {}", applied.applied_at.to_rfc3339());
}

fn inspect(
    client: &mut Client,
    table: &str,
    column: &str,
    index: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut verifier = SchemaVerifier::new(client);
    verifier.assert_table_exists(table)?;

    let type_name = verifier
        .column_type_name(table, column)?
        .ok_or_else(|| format!("Column '{}' does not exist in table '{}'", column, table))?;
    let data_type = verifier.column_data_type(table, column)?.unwrap_or_default();
    println!("{}.{}", table, column);
    println!("  type: {} (information_schema: {})", type_name, data_type);

    let postgis = verifier.extension_exists("postgis")?;
    // geometry_columns only exists once PostGIS is installed
    if postgis {
        if let Some(geometry) = verifier.geometry_column(table, column)? {
            println!(
                "  geometry: {} srid={}",
                geometry.geometry_type, geometry.srid
            );
        }
    }
    println!("  rows: {}", verifier.row_count(table)?);
    println!(
        "  postgis: {}",
        if postgis { "installed" } else { "not installed" }
    );

    if let Some(index) = index {
        match verifier.index_method(index)? {
            Some(method) if verifier.index_exists(table, index)? => {
                println!("  index {}: {}", index, method)
            }
            _ => println!("  index {}: missing", index),
        }
    }
    Ok(())
}
