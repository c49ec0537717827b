//! SandBlox - SimpleVault withdrawal client
//!
//! Inspects a deployed vault over JSON-RPC, manages the locally persisted
//! token list, meta-transaction settings and signatures, and runs an
//! in-memory walkthrough of the full withdrawal lifecycle.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use sandblox::cli::commands;
use sandblox::config::Config;

/// SandBlox - SimpleVault withdrawal client
#[derive(Parser)]
#[command(name = "sandblox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sandblox.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC connectivity and the configured chain
    Health,

    /// Show native and token balances
    Balance {
        /// Account to inspect (default: the configured vault)
        #[arg(long)]
        account: Option<String>,

        /// Token addresses (default: tracked tokens)
        #[arg(long = "token")]
        tokens: Vec<String>,
    },

    /// Manage tracked vault tokens
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Meta-transaction settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Signed meta-transactions awaiting broadcast
    Signed {
        #[command(subcommand)]
        action: SignedAction,
    },

    /// Run the withdrawal lifecycle against an in-memory vault
    Demo,
}

#[derive(Subcommand)]
enum TokenAction {
    /// List tracked tokens
    List,

    /// Track a token
    Add {
        /// Token contract address
        token: String,
    },

    /// Stop tracking a token
    Remove {
        /// Token contract address
        token: String,
    },

    /// Refetch every tracked balance
    Refresh,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show current settings
    Show,

    /// Update settings
    Set {
        /// Signature lifetime in seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Gas price ceiling in gwei
        #[arg(long)]
        max_gas_price: Option<String>,
    },
}

#[derive(Subcommand)]
enum SignedAction {
    /// List stored signatures
    List,

    /// Delete stored signatures
    Clear {
        /// Only this transaction
        #[arg(long)]
        tx_id: Option<u64>,

        /// approve or cancel (with --tx-id)
        #[arg(long)]
        action: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sandblox=info")),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Balance { account, tokens } => commands::balance(&config, account, tokens).await,
        Commands::Tokens { action } => match action {
            TokenAction::List => commands::tokens_list(&config).await,
            TokenAction::Add { token } => commands::tokens_add(&config, &token).await,
            TokenAction::Remove { token } => commands::tokens_remove(&config, &token).await,
            TokenAction::Refresh => commands::tokens_refresh(&config).await,
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::settings_show(&config).await,
            SettingsAction::Set {
                deadline,
                max_gas_price,
            } => commands::settings_set(&config, deadline, max_gas_price).await,
        },
        Commands::Signed { action } => match action {
            SignedAction::List => commands::signed_list(&config).await,
            SignedAction::Clear {
                tx_id,
                action,
                force,
            } => commands::signed_clear(&config, tx_id, action, force).await,
        },
        Commands::Demo => commands::demo(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
