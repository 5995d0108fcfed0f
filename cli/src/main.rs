mod commands;
mod util;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use util::require_admin_token;

#[derive(Parser)]
#[command(
    name = "riskgate",
    version,
    about = "Riskgate CLI: inspect and tune adaptive rate limits"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "RISKGATE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Admin bearer token (see `riskgate admin-token`)
    #[arg(long, env = "RISKGATE_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Skip pretty-printing (raw JSON for piping)
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Check connectivity, admin access and current load
    Doctor,
    /// Current system load and emergency mode (admin)
    Status,
    /// Adaptive rate limit configuration (admin)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Trust profile of a user as the scorer sees it (admin)
    Trust {
        /// User UUID
        #[arg(long)]
        user_id: String,
    },
    /// Register or replace a user's account facts (admin)
    Account {
        /// User UUID
        #[arg(long)]
        user_id: String,
        /// Account creation time, RFC 3339 (defaults to now)
        #[arg(long)]
        created_at: Option<String>,
        /// Spam classifier score 0-100
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        spam_score: Option<u8>,
        /// Mark the account as verified
        #[arg(long)]
        verified: bool,
    },
    /// Preview the adaptive quota for a user without counting a request (admin)
    Quota {
        /// User UUID
        #[arg(long)]
        user_id: String,
        /// post, comment, like, report, upload, message or follow
        #[arg(long)]
        content_type: String,
        /// Baseline max (defaults to the server's configured baseline)
        #[arg(long)]
        max: Option<i64>,
        /// Baseline window in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,
    },
    /// Submit content as a user and show the rate limit headers
    Submit {
        /// User UUID sent as x-user-id
        #[arg(long)]
        user_id: String,
        /// Collection: posts, comments, likes, reports, uploads, messages, follows
        collection: String,
        /// Content payload as JSON object
        #[arg(long, short = 'd')]
        data: Option<String>,
    },
    /// Generate a new admin token and the hash the server expects
    AdminToken,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.as_str();
    let token = cli.admin_token.as_deref();
    tracing::debug!(api_url, "riskgate cli");

    let code = match cli.command {
        Commands::Health => commands::health::run(api_url, cli.raw).await,
        Commands::Doctor => commands::system::doctor(api_url, token).await,
        Commands::Status => {
            commands::system::status(api_url, require_admin_token(token), cli.raw).await
        }
        Commands::Config { command } => {
            commands::config::run(api_url, require_admin_token(token), command, cli.raw).await
        }
        Commands::Trust { user_id } => {
            commands::users::trust(api_url, require_admin_token(token), &user_id, cli.raw).await
        }
        Commands::Account {
            user_id,
            created_at,
            spam_score,
            verified,
        } => {
            commands::users::account(
                api_url,
                require_admin_token(token),
                &user_id,
                created_at.as_deref(),
                spam_score,
                verified,
                cli.raw,
            )
            .await
        }
        Commands::Quota {
            user_id,
            content_type,
            max,
            window_ms,
        } => {
            commands::users::quota(
                api_url,
                require_admin_token(token),
                &user_id,
                &content_type,
                max,
                window_ms,
                cli.raw,
            )
            .await
        }
        Commands::Submit {
            user_id,
            collection,
            data,
        } => {
            commands::content::submit(api_url, &user_id, &collection, data.as_deref(), cli.raw)
                .await
        }
        Commands::AdminToken => commands::admin::generate_token(),
    };

    std::process::exit(code);
}
