mod server;

use std::net::SocketAddr;

use axum::http::HeaderName;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use locksmith_hub::{
    ApiSelector, HubStats, InternalKeyPolicy, LeaderboardQuery, StatsError,
    params::DEFAULT_LEADERBOARD_MIN_CALLS,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Usage statistics for the Locksmith API gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server that answers the stats endpoints.
    Serve(ServeArgs),
    /// Print the quarterly caller leaderboard as JSON.
    Leaderboard(LeaderboardArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    /// SQLite database holding the gateway's apis, keys and reports tables.
    #[arg(long, env = "HUB_DB_PATH", default_value = "locksmith_hub.db")]
    db_path: String,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "HUB_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "HUB_PORT", default_value_t = 8080)]
    port: u16,

    /// Request header carrying the user name set by the auth proxy.
    #[arg(long, env = "FORWARD_AUTH_HEADER")]
    forward_auth_header: Option<String>,

    /// Comma separated user names allowed on staff routes.
    #[arg(long, value_delimiter = ',', env = "FORWARD_AUTH_STAFF_USERS")]
    staff_users: Vec<String>,

    /// Treat every request as coming from this staff user. Development only.
    #[arg(long, env = "DEV_STAFF_NAME")]
    dev_staff_name: Option<String>,

    /// Email suffixes whose keys count as internal.
    #[arg(long, value_delimiter = ',', env = "INTERNAL_EMAIL_SUFFIXES")]
    internal_email_suffix: Vec<String>,
}

#[derive(Debug, Parser)]
struct LeaderboardArgs {
    #[arg(long, env = "HUB_DB_PATH", default_value = "locksmith_hub.db")]
    db_path: String,

    /// Year of the quarter's first month.
    #[arg(long)]
    year: i32,

    /// First month of the quarter (1-12).
    #[arg(long)]
    month: u32,

    /// Restrict the leaderboard to one API.
    #[arg(long)]
    api_name: Option<String>,

    /// Minimum calls in a quarter to be ranked.
    #[arg(long, default_value_t = DEFAULT_LEADERBOARD_MIN_CALLS)]
    min_calls: i64,

    /// Rank internal keys too.
    #[arg(long)]
    include_internal: bool,

    #[arg(long, value_delimiter = ',', env = "INTERNAL_EMAIL_SUFFIXES")]
    internal_email_suffix: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            run_server(args).await?;
        }
        Command::Leaderboard(args) => {
            if let Err(err) = run_leaderboard(args).await {
                report_error(&err);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let policy = InternalKeyPolicy::new(args.internal_email_suffix);
    let stats = HubStats::open(&args.db_path, policy).await?;

    let user_header = args
        .forward_auth_header
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| HeaderName::from_bytes(name.as_bytes()))
        .transpose()?;
    let forward_auth =
        server::ForwardAuthConfig::new(user_header, args.staff_users, args.dev_staff_name);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    server::serve(addr, stats, forward_auth).await
}

async fn run_leaderboard(args: LeaderboardArgs) -> Result<(), StatsError> {
    let policy = InternalKeyPolicy::new(args.internal_email_suffix);
    let stats = HubStats::open(&args.db_path, policy).await?;

    let api = match args.api_name {
        Some(name) => Some(
            stats
                .resolve_api(&ApiSelector {
                    id: None,
                    name: Some(name),
                })
                .await?,
        ),
        None => None,
    };
    let query = LeaderboardQuery {
        ignore_internal_keys: !args.include_internal,
        min_calls: args.min_calls,
    };

    let board = stats
        .quarterly_leaderboard(args.year, args.month, api.as_ref(), &query)
        .await?;
    let output = serde_json::json!({
        "earliest_date": board.begin.to_string(),
        "latest_date": board.end.to_string(),
        "by_key": board.entries,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{output}"),
    }

    Ok(())
}

fn report_error(err: &StatsError) {
    eprintln!("error: {err}");
    match err {
        StatsError::Database(db_err) => {
            eprintln!("  database: {db_err}");
        }
        StatsError::InvalidParameter { name, .. } => {
            eprintln!("  check the --{} argument", name.replace('_', "-"));
        }
        _ => {}
    }
}
