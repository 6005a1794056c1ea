// MAMA OS — `mama` CLI.
//
// A thin terminal front-end onto the same `Store` the daemon writes: list
// sessions, inspect the delegation audit trail for a channel, and manage
// cron jobs. Never talks to gateways or the LLM runner directly — it reads
// and writes the sqlite store the daemon already owns.

use clap::{Parser, Subcommand};
use mama_core::atoms::error::EngineResult;
use mama_core::config::{self, ConfigHandle};
use mama_core::cron;
use mama_core::store::{self, Store};

#[derive(Parser)]
#[command(name = "mama", version, about = "Inspect and manage a MAMA OS daemon's persisted state")]
struct Cli {
    /// Path to the sqlite store the daemon writes to.
    #[arg(long, env = "MAMA_DB_PATH")]
    db_path: Option<std::path::PathBuf>,

    /// Path to the daemon's config.toml.
    #[arg(long, env = "MAMA_CONFIG_PATH")]
    config_path: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration as TOML.
    Config,
    /// List sessions known to the store.
    Sessions,
    /// Show the delegation audit trail for a channel key.
    Delegations {
        /// Channel key, e.g. "discord:123456".
        channel_key: String,
    },
    /// Manage cron jobs (C14).
    #[command(subcommand)]
    Cron(CronCommand),
    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CronCommand {
    /// List every persisted job.
    List,
    /// Create or update a job.
    Add {
        id: String,
        /// "every 15m", "every 2h", or "daily HH:MM".
        schedule: String,
        #[arg(long, default_value_t = true)]
        enabled: bool,
    },
    /// Delete a job.
    Remove { id: String },
}

fn main() -> EngineResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Config => {
            let path = cli.config_path.unwrap_or_else(config::default_config_path);
            let handle = ConfigHandle::new(mama_core::atoms::types::MamaConfig::load(&path)?);
            let snapshot = handle.snapshot();
            println!("{}", toml::to_string_pretty(&*snapshot).expect("serialize config"));
        }
        Command::Sessions => {
            let store = open_store(cli.db_path)?;
            print_sessions(&store)?;
        }
        Command::Delegations { channel_key } => {
            let store = open_store(cli.db_path)?;
            print_delegations(&store, &channel_key)?;
        }
        Command::Cron(cmd) => {
            let store = open_store(cli.db_path)?;
            match cmd {
                CronCommand::List => print_cron_jobs(&store)?,
                CronCommand::Add { id, schedule, enabled } => {
                    cron::upsert_job(&store, &id, &schedule, enabled)?;
                    println!("upserted cron job '{id}'");
                }
                CronCommand::Remove { id } => {
                    cron::remove_job(&store, &id)?;
                    println!("removed cron job '{id}'");
                }
            }
        }
        Command::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "mama", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn open_store(db_path: Option<std::path::PathBuf>) -> EngineResult<Store> {
    let path = db_path.unwrap_or_else(store::default_db_path);
    Store::open(&path)
}

fn print_sessions(store: &Store) -> EngineResult<()> {
    let conn = store.conn.lock();
    let mut stmt = conn.prepare(
        "SELECT session_id, channel_key, created_at, last_active, message_count, status
         FROM sessions ORDER BY last_active DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    println!("{:<36}  {:<24}  {:<20}  {:>5}  {}", "session_id", "channel_key", "last_active", "msgs", "status");
    for row in rows {
        let (session_id, channel_key, _created_at, last_active, message_count, status) = row?;
        println!("{session_id:<36}  {channel_key:<24}  {last_active:<20}  {message_count:>5}  {status}");
    }
    Ok(())
}

fn print_delegations(store: &Store, channel_key: &str) -> EngineResult<()> {
    let conn = store.conn.lock();
    let mut stmt = conn.prepare(
        "SELECT from_id, to_id, status, wave, depth, created_at, task
         FROM decision_edges WHERE channel_key = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(rusqlite::params![channel_key], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    println!("{:<16}  {:<16}  {:<10}  {:>4}  {:>5}  {}", "from", "to", "status", "wave", "depth", "task");
    for row in rows {
        let (from_id, to_id, status, wave, depth, _created_at, task) = row?;
        println!("{from_id:<16}  {to_id:<16}  {status:<10}  {wave:>4}  {depth:>5}  {task}");
    }
    Ok(())
}

fn print_cron_jobs(store: &Store) -> EngineResult<()> {
    let jobs = cron::list_jobs(store)?;
    println!("{:<20}  {:<16}  {:<7}  {:<20}  {}", "id", "schedule", "enabled", "next_run", "last_status");
    for job in jobs {
        let next_run = job.next_run.map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".to_string());
        let last_status = job.last_status.unwrap_or_else(|| "-".to_string());
        println!("{:<20}  {:<16}  {:<7}  {:<20}  {}", job.id, job.schedule, job.enabled, next_run, last_status);
    }
    Ok(())
}
