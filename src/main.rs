use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vigil::auth::{IssueOptions, TokenIssuer};
use vigil::config::{self, Config, LogFormat};
use vigil::models::token::AccountId;
use vigil::store::postgres::PgStore;
use vigil::store::{AccountDirectory, TokenStore};
use vigil::AppState;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let cfg = config::load()?;
    init_tracing(&cfg.log_format);

    match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Migrate) => {
            let db = connect(&cfg).await?;
            db.migrate().await?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Some(cli::Commands::Token { command }) => {
            let db = connect(&cfg).await?;
            handle_token_command(command, db).await
        }
        Some(cli::Commands::Account { command }) => {
            let db = connect(&cfg).await?;
            handle_account_command(command, db).await
        }
        None => run_server(cfg, None).await,
    }
}

/// Logs always go to stderr so `token create` stdout carries only the token.
fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vigil=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn connect(cfg: &Config) -> anyhow::Result<PgStore> {
    PgStore::connect(
        &cfg.database_url,
        cfg.db_max_connections,
        cfg.store_timeout(),
    )
    .await
    .context("failed to connect to the token store")
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = connect(&cfg).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let tokens: Arc<dyn TokenStore> = Arc::new(db.clone());
    let accounts: Arc<dyn AccountDirectory> = Arc::new(db);
    if cfg.admin_key.is_none() {
        tracing::warn!("VIGIL_ADMIN_KEY is not set; the admin token API is disabled");
    }
    let state = Arc::new(AppState::new(tokens, accounts, cfg.admin_key.clone()));

    let app = vigil::api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("vigil listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("vigil stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn issuer_for(db: PgStore) -> TokenIssuer {
    let tokens: Arc<dyn TokenStore> = Arc::new(db.clone());
    let accounts: Arc<dyn AccountDirectory> = Arc::new(db);
    TokenIssuer::new(tokens, accounts)
}

async fn handle_token_command(cmd: cli::TokenCommands, db: PgStore) -> anyhow::Result<()> {
    let issuer = issuer_for(db);
    match cmd {
        cli::TokenCommands::Create { account, rotate } => {
            let issued = issuer
                .issue(
                    &account,
                    IssueOptions {
                        revoke_existing: rotate,
                    },
                )
                .await?;
            // The token is the only thing on stdout.
            println!("{}", issued.secret());
        }
        cli::TokenCommands::List { account } => {
            let tokens = issuer.list_for_account(&account).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<38} {:<14} {:<20} {:<20} STATUS",
                    "ID", "PREFIX", "CREATED", "LAST USED"
                );
                for t in tokens {
                    let last_used = t
                        .last_used_at
                        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<38} {:<14} {:<20} {:<20} {}",
                        t.id,
                        t.prefix,
                        t.created_at.format("%Y-%m-%d %H:%M:%S"),
                        last_used,
                        t.status()
                    );
                }
            }
        }
        cli::TokenCommands::Revoke { token_id } => {
            let id = uuid::Uuid::parse_str(&token_id).context("Invalid token id")?;
            if issuer.revoke(id).await? {
                println!("Token revoked.");
            } else {
                println!("Token not found.");
            }
        }
    }
    Ok(())
}

async fn handle_account_command(cmd: cli::AccountCommands, db: PgStore) -> anyhow::Result<()> {
    match cmd {
        cli::AccountCommands::Add { account } => {
            let id = AccountId::new(account).context("account name must not be empty")?;
            if db.add_account(&id).await? {
                println!("Account {} added.", id);
            } else {
                println!("Account {} already exists.", id);
            }
        }
        cli::AccountCommands::Remove { account } => {
            let revoked = issuer_for(db).remove_account(&account).await?;
            println!("Account removed ({} token(s) revoked).", revoked);
        }
        cli::AccountCommands::List => {
            let accounts = db.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                for a in accounts {
                    println!("{}", a);
                }
            }
        }
    }
    Ok(())
}
