use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{accrual, calendar, trade};

#[derive(Parser)]
#[command(name = "brk")]
#[command(about = "Brokerage allocation + accrual CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> env -> overrides...)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Trade lifecycle (FIFO allocation runs on every write)
    Trade {
        #[command(subcommand)]
        cmd: TradeCmd,
    },

    /// Brokerage accrual for a period
    Accrual {
        #[command(subcommand)]
        cmd: AccrualCmd,
    },

    /// Trading calendar queries
    Calendar {
        #[command(subcommand)]
        cmd: CalendarCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
pub(crate) enum TradeCmd {
    /// Record a trade. A SELL is allocated against open lots immediately.
    Record {
        #[arg(long)]
        client: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        exchange: String,
        /// BUY | SELL
        #[arg(long)]
        side: String,
        #[arg(long)]
        quantity: i64,
        /// Decimal price, e.g. 101.25
        #[arg(long)]
        price: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "0")]
        charges: String,
    },

    /// Replace a trade. Allocations are reversed and re-run; the result gets a new id.
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        client: Option<i64>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        exchange: Option<String>,
        #[arg(long)]
        side: Option<String>,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long)]
        price: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        charges: Option<String>,
    },

    /// Delete a trade (a BUY must have no consumers).
    Delete {
        #[arg(long)]
        id: i64,
    },

    /// Print a trade and its allocations
    Show {
        #[arg(long)]
        id: i64,
    },

    /// Check allocation conservation for a trade; exits non-zero when unbalanced
    Verify {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
pub(crate) enum AccrualCmd {
    /// Calculate and persist. Whole book unless --client is given.
    Run {
        /// YYYY-MM | YYYY-Qn | YYYY-MM-DD
        #[arg(long)]
        period: String,
        #[arg(long)]
        client: Option<i64>,
    },

    /// Compute one client's calculation without writing or locking
    Preview {
        #[arg(long)]
        period: String,
        #[arg(long)]
        client: i64,
    },

    /// Print a stored calculation with its details
    Show {
        #[arg(long)]
        period: String,
        #[arg(long)]
        client: i64,
    },

    /// Delete a stored calculation and release its trade locks
    Unlock {
        #[arg(long)]
        period: String,
        #[arg(long)]
        client: i64,
    },
}

#[derive(Subcommand)]
pub(crate) enum CalendarCmd {
    /// Tradeable days for an exchange, by date range or by quarter
    Days {
        #[arg(long)]
        exchange: String,
        #[arg(long, requires = "to", conflicts_with_all = ["year", "quarter"])]
        from: Option<String>,
        #[arg(long, requires = "from")]
        to: Option<String>,
        #[arg(long, requires = "quarter")]
        year: Option<i32>,
        #[arg(long, requires = "year")]
        quarter: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // dev-time bootstrap; a missing file is fine
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let cfg = commands::load_engine_config(&cli.config_paths)?;
            let db = brk_config::resolve_database_url(&cfg)?;
            let pool = brk_db::connect(&db.url, db.max_connections).await?;
            match cmd {
                DbCmd::Status => {
                    let s = brk_db::status(&pool).await?;
                    println!("db_ok={} has_trades_table={}", s.ok, s.has_trades_table);
                }
                DbCmd::Migrate => {
                    brk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = brk_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Trade { cmd } => {
            let cfg = commands::load_engine_config(&cli.config_paths)?;
            let services = commands::Services::connect(&cfg).await?;
            trade::run(&services, cmd).await?;
        }

        Commands::Accrual { cmd } => {
            let cfg = commands::load_engine_config(&cli.config_paths)?;
            let services = commands::Services::connect(&cfg).await?;
            accrual::run(&services, cmd).await?;
        }

        Commands::Calendar { cmd } => {
            let cfg = commands::load_engine_config(&cli.config_paths)?;
            let cal = commands::build_calendar(&cfg)?;
            calendar::run(&cal, cmd)?;
        }
    }

    Ok(())
}
