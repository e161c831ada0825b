mod auth;
mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_dashboard, cmd_delete, cmd_import, cmd_intakes, cmd_log, cmd_source_add, cmd_source_delete,
    cmd_source_list, cmd_source_update, cmd_summary_generate, cmd_summary_list, cmd_summary_range,
    cmd_target_delete, cmd_target_list, cmd_target_set, cmd_target_show, cmd_update, cmd_user_add,
    cmd_user_email, cmd_user_list, cmd_user_show, cmd_user_token, cmd_user_weight, json_error,
};
use crate::config::Config;
use whey_core::TrackerService;

#[derive(Parser)]
#[command(
    name = "whey",
    version,
    about = "A daily protein intake tracker",
    long_about = "Track protein intake against a daily target derived from body weight.\n\
                  Targets are weight (kg) * 0.8 grams; daily summaries stay in sync as you log."
)]
struct Cli {
    /// Act as this user (defaults to the only user when exactly one exists)
    #[arg(short, long, global = true, env = "WHEY_USER")]
    user: Option<String>,
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users and their weight
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage protein sources
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },
    /// Log protein intake from a source
    Log {
        /// Source ID or name
        source: String,
        /// Grams of protein (e.g. "25" or "25g")
        grams: String,
        /// Date to log for (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Update an intake (grams, date or source)
    Update {
        /// Intake ID to update
        id: i64,
        /// New grams of protein
        #[arg(short, long)]
        grams: Option<String>,
        /// New date (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        date: Option<String>,
        /// New source ID or name
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Delete an intake by ID
    Delete {
        /// Intake ID to delete
        id: i64,
    },
    /// List intakes for a date or date range
    Intakes {
        /// Exact date
        #[arg(long, conflicts_with_all = ["start", "end"])]
        date: Option<String>,
        /// First date of the range (inclusive)
        #[arg(long)]
        start: Option<String>,
        /// Last date of the range (inclusive)
        #[arg(long)]
        end: Option<String>,
    },
    /// Manage daily protein targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
    /// Generate and list daily summaries
    Summary {
        #[command(subcommand)]
        command: SummaryCommands,
    },
    /// Show target, total and remaining protein for a day (default: today)
    Dashboard {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
    },
    /// Import intakes from a CSV file (columns: Date, Source, Protein (g))
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        /// Username (letters, digits and @/./+/-/_)
        name: String,
        /// Email address (unique)
        #[arg(short, long)]
        email: Option<String>,
        /// Body weight in kg
        #[arg(short, long)]
        weight: Option<String>,
    },
    /// List all users
    List,
    /// Show the acting user
    Show,
    /// Record the acting user's body weight in kg
    Weight {
        /// Weight in kg (e.g. "70" or "70.5")
        kg: String,
    },
    /// Set the acting user's email address
    Email {
        /// Email address
        address: String,
    },
    /// Issue a new API token for the acting user
    Token,
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Add a protein source
    Add {
        /// Source name
        name: String,
        /// Grams of protein per 100g
        #[arg(long)]
        protein: String,
        /// Category (e.g. poultry, dairy, legumes)
        #[arg(short, long)]
        category: String,
    },
    /// List/search protein sources
    List {
        /// Filter by name or category
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Update a protein source
    Update {
        /// Source ID
        id: i64,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New grams of protein per 100g
        #[arg(long)]
        protein: Option<String>,
        /// New category
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Delete a protein source and every intake logged against it
    Delete {
        /// Source ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Compute the target for a date from the current weight (default: today)
    Set {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
    },
    /// Show the target for a date (default: today)
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
    },
    /// List targets, optionally within a date range
    List {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Delete the target for a date, along with its summary
    Delete {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: String,
    },
}

#[derive(Subcommand)]
enum SummaryCommands {
    /// Reconcile the summary for one date (default: today)
    Generate {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
    },
    /// Reconcile every date in an inclusive range
    Range {
        /// First date
        start: String,
        /// Last date
        end: String,
    },
    /// List stored summaries, optionally within a date range
    List {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
}

/// `WHEY_LOG` takes precedence over `RUST_LOG`. Logs go to stderr so stdout
/// stays clean for `--json`.
fn init_tracing(default: &str) {
    let filter = std::env::var("WHEY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default.to_string());
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    });

    let json = cli.json;
    if let Err(e) = run(cli).await {
        if json {
            println!("{}", json_error(&format!("{e:#}")));
        } else {
            eprintln!("Error: {e:#}");
        }
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = TrackerService::new(&config.db_path)?;
    let json = cli.json;
    let acting_user = || svc.resolve_user(cli.user.as_deref());

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Add {
                name,
                email,
                weight,
            } => cmd_user_add(&svc, &name, email, weight.as_deref(), json),
            UserCommands::List => cmd_user_list(&svc, json),
            UserCommands::Show => cmd_user_show(&acting_user()?, json),
            UserCommands::Weight { kg } => cmd_user_weight(&svc, &acting_user()?, &kg, json),
            UserCommands::Email { address } => {
                cmd_user_email(&svc, &acting_user()?, &address, json)
            }
            UserCommands::Token => cmd_user_token(&svc, &acting_user()?, json),
        },
        Commands::Source { command } => match command {
            SourceCommands::Add {
                name,
                protein,
                category,
            } => cmd_source_add(&svc, &name, &protein, &category, json),
            SourceCommands::List { search } => cmd_source_list(&svc, search.as_deref(), json),
            SourceCommands::Update {
                id,
                name,
                protein,
                category,
            } => cmd_source_update(&svc, id, name, protein.as_deref(), category, json),
            SourceCommands::Delete { id } => cmd_source_delete(&svc, id, json),
        },
        Commands::Log {
            source,
            grams,
            date,
        } => cmd_log(&svc, &acting_user()?, &source, &grams, date, json),
        Commands::Update {
            id,
            grams,
            date,
            source,
        } => cmd_update(
            &svc,
            &acting_user()?,
            id,
            grams.as_deref(),
            date,
            source.as_deref(),
            json,
        ),
        Commands::Delete { id } => cmd_delete(&svc, &acting_user()?, id, json),
        Commands::Intakes { date, start, end } => {
            cmd_intakes(&svc, &acting_user()?, date, start, end, json)
        }
        Commands::Target { command } => {
            let user = acting_user()?;
            match command {
                TargetCommands::Set { date } => cmd_target_set(&svc, &user, date, json),
                TargetCommands::Show { date } => cmd_target_show(&svc, &user, date, json),
                TargetCommands::List { start, end } => {
                    cmd_target_list(&svc, &user, start, end, json)
                }
                TargetCommands::Delete { date } => {
                    cmd_target_delete(&svc, &user, Some(date), json)
                }
            }
        }
        Commands::Summary { command } => {
            let user = acting_user()?;
            match command {
                SummaryCommands::Generate { date } => {
                    cmd_summary_generate(&svc, &user, date, json)
                }
                SummaryCommands::Range { start, end } => {
                    cmd_summary_range(&svc, &user, Some(start), Some(end), json)
                }
                SummaryCommands::List { start, end } => {
                    cmd_summary_list(&svc, &user, start, end, json)
                }
            }
        }
        Commands::Dashboard { date } => cmd_dashboard(&svc, &acting_user()?, date, json),
        Commands::Import { file, dry_run } => {
            cmd_import(&svc, &acting_user()?, &file, dry_run, json)
        }
        Commands::Serve { port, bind } => server::start_server(svc, port, &bind).await,
    }
}
