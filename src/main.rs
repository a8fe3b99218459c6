//! kvport command-line front end.
//!
//! Opens the driver named in a store file, runs one operation against it
//! and shuts it down again.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvport::{Driver, Registry, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "kvport", version)]
#[command(about = "Run key-value operations against a configured driver")]
struct Cli {
    /// Store file naming the driver and its options
    #[arg(short, long, global = true, default_value = "kvport.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List driver types compiled into this build
    Drivers,
    /// Show what the configured driver supports
    Features,
    /// Print a value
    Get { key: String },
    /// Store a value, optionally expiring after --ttl seconds
    Set {
        key: String,
        value: String,
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },
    /// Remove a value
    Delete { key: String },
    /// Store a value only if the key is absent
    Insert {
        key: String,
        value: String,
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },
    /// Store a value only if the key is present
    Update {
        key: String,
        value: String,
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },
    /// Add to a counter and print the new value
    Incr {
        key: String,
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        by: i64,
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },
    /// Print a counter
    Counter { key: String },
    /// Print one page of records
    Scan {
        /// Walk keys in descending order
        #[arg(long)]
        reverse: bool,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Resume after this key
        #[arg(long, default_value = "")]
        cursor: String,
    },
}

fn init_logging(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let registry = Registry::with_builtin_drivers();
    if let Command::Drivers = cli.command {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let store = StoreConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load store file: {}", cli.config.display()))?;
    let driver = store
        .open(&registry)
        .with_context(|| format!("Failed to configure driver '{}'", store.driver))?;

    driver
        .start()
        .await
        .with_context(|| format!("Failed to start driver '{}'", driver.name()))?;
    let outcome = run(driver.as_ref(), cli.command).await;
    driver
        .stop()
        .await
        .with_context(|| format!("Failed to stop driver '{}'", driver.name()))?;
    outcome
}

async fn run(driver: &dyn Driver, command: Command) -> Result<()> {
    let mut out = std::io::stdout().lock();

    match command {
        Command::Drivers => {},
        Command::Features => {
            writeln!(out, "{}: {}", driver.name(), driver.features())?;
        },
        Command::Get { key } => {
            let value = driver.get(key.as_bytes()).await.context("get failed")?;
            out.write_all(&value)?;
            writeln!(out)?;
        },
        Command::Set { key, value, ttl } => match ttl {
            Some(ttl) => driver.set_with_ttl(key.as_bytes(), value.as_bytes(), ttl).await?,
            None => driver.set(key.as_bytes(), value.as_bytes()).await?,
        },
        Command::Delete { key } => driver.delete(key.as_bytes()).await?,
        Command::Insert { key, value, ttl } => {
            let written = match ttl {
                Some(ttl) => driver.insert_with_ttl(key.as_bytes(), value.as_bytes(), ttl).await?,
                None => driver.insert(key.as_bytes(), value.as_bytes()).await?,
            };
            writeln!(out, "{written}")?;
        },
        Command::Update { key, value, ttl } => {
            let written = match ttl {
                Some(ttl) => driver.update_with_ttl(key.as_bytes(), value.as_bytes(), ttl).await?,
                None => driver.update(key.as_bytes(), value.as_bytes()).await?,
            };
            writeln!(out, "{written}")?;
        },
        Command::Incr { key, by, ttl } => {
            let value = match ttl {
                Some(ttl) => driver.increase_counter_with_ttl(key.as_bytes(), by, ttl).await?,
                None => driver.increase_counter(key.as_bytes(), by).await?,
            };
            writeln!(out, "{value}")?;
        },
        Command::Counter { key } => {
            writeln!(out, "{}", driver.get_counter(key.as_bytes()).await?)?;
        },
        Command::Scan {
            reverse,
            limit,
            cursor,
        } => {
            let page = if reverse {
                driver.prev(cursor.as_bytes(), limit).await?
            } else {
                driver.next(cursor.as_bytes(), limit).await?
            };
            for record in &page.records {
                writeln!(
                    out,
                    "{}\t{}",
                    String::from_utf8_lossy(record.key()),
                    String::from_utf8_lossy(record.value())
                )?;
            }
            if !page.is_last() {
                writeln!(out, "-- cursor: {}", String::from_utf8_lossy(page.cursor.as_bytes()))?;
            }
        },
    }

    Ok(())
}
