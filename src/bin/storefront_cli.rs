use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use sea_orm::ActiveEnum;
use serde_json::json;
use storefront_api::{
    config::{self, AppConfig},
    db::{self, DbPool},
    handlers::AppServices,
    services::{
        admin_auth::NewAdmin,
        gift_cards::{GiftCardService, IssueGiftCard},
    },
};
use tracing::info;

#[derive(Parser)]
#[command(name = "storefront", about = "Storefront maintenance commands", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Create an administrator account (MFA is enrolled on first login)
    CreateAdmin(CreateAdminArgs),
    /// Issue a gift card
    IssueGiftCard(IssueGiftCardArgs),
    /// Delete refresh-token rows that expired more than a day ago
    PurgeRefreshTokens,
}

#[derive(Args)]
struct CreateAdminArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "admin")]
    role: String,
    /// Read from STOREFRONT_ADMIN_PASSWORD when omitted
    #[arg(long, env = "STOREFRONT_ADMIN_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args)]
struct IssueGiftCardArgs {
    /// Amount in minor units
    #[arg(long)]
    amount: i64,
    #[arg(long)]
    purchaser_email: Option<String>,
    #[arg(long)]
    recipient_email: Option<String>,
    #[arg(long)]
    recipient_name: Option<String>,
    /// RFC 3339 expiry timestamp
    #[arg(long)]
    expires_at: Option<DateTime<Utc>>,
    /// Activate immediately instead of leaving the card pending
    #[arg(long, action = ArgAction::SetTrue)]
    activate: bool,
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        let db_pool = db::establish_connection(&config)
            .await
            .context("failed to connect to database")?;
        Ok(Self {
            config,
            db: Arc::new(db_pool),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("migration failed")?;
            info!("migrations applied");
            println!("Migrations applied");
        }
        Commands::CreateAdmin(args) => create_admin(&context, args, cli.json).await?,
        Commands::IssueGiftCard(args) => issue_gift_card(&context, args, cli.json).await?,
        Commands::PurgeRefreshTokens => {
            let services = AppServices::from_config(context.db.clone(), &context.config);
            let removed = services
                .admin_auth
                .purge_expired_refresh_tokens()
                .await
                .context("failed to purge refresh tokens")?;
            if cli.json {
                print_json(&json!({ "removed": removed }))?;
            } else {
                println!("Removed {} expired refresh tokens", removed);
            }
        }
    }
    Ok(())
}

async fn create_admin(context: &CliContext, args: CreateAdminArgs, as_json: bool) -> Result<()> {
    let services = AppServices::from_config(context.db.clone(), &context.config);
    let admin = services
        .admin_auth
        .create_admin(NewAdmin {
            email: args.email,
            name: args.name,
            role: args.role,
            password: args.password,
        })
        .await
        .context("failed to create administrator")?;

    if as_json {
        print_json(&json!({ "id": admin.id, "email": admin.email, "role": admin.role }))?;
    } else {
        println!("Administrator {} created (id {}, role {})", admin.email, admin.id, admin.role);
    }
    Ok(())
}

async fn issue_gift_card(context: &CliContext, args: IssueGiftCardArgs, as_json: bool) -> Result<()> {
    let service = GiftCardService::new(context.db.clone(), context.config.currency.clone());
    let mut card = service
        .issue(IssueGiftCard {
            amount: args.amount,
            purchaser_email: args.purchaser_email,
            recipient_email: args.recipient_email,
            recipient_name: args.recipient_name,
            expires_at: args.expires_at,
        })
        .await
        .context("failed to issue gift card")?;
    if args.activate {
        card = service
            .activate(card.id)
            .await
            .context("failed to activate gift card")?;
    }

    if as_json {
        print_json(&json!({
            "id": card.id,
            "code": card.code,
            "balance": card.current_balance,
            "currency": card.currency,
            "status": card.status.to_value(),
        }))?;
    } else {
        println!(
            "Gift card {} • balance {} {} • status {}",
            card.code,
            card.current_balance,
            card.currency,
            card.status.to_value()
        );
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
