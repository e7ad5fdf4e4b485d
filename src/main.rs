#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tracing::info;

mod cli;
mod config;
mod db;
mod export;
mod matrix;
mod migration;
mod utils;

use cli::{Cli, Command};
use config::Config;
use matrix::{Homeserver, MatrixClient};
use migration::{
    DirectMessageReconciler, LastRoomMessages, MessageImporter, MigrationContext,
    NotificationImporter, ReadStatePropagator, RoomImporter, UserImporter,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    utils::logging::init_tracing(&config.logging);
    info!("rocketchat2matrix starting up");

    let db_manager = db::DatabaseManager::new(&config.database)
        .await
        .context("failed to open the mapping database")?;
    db_manager
        .migrate()
        .await
        .context("failed to prepare the mapping database")?;
    info!("mapping database ready at {}", db_manager.path());

    let client = MatrixClient::new(
        &config.homeserver.url,
        SecretString::from(config.admin.access_token.clone()),
        config.homeserver.request_timeout(),
    )?;
    let admin = client
        .whoami(&config.admin.access_token)
        .await
        .context("homeserver rejected the admin access token")?;
    info!("connected to {} as {}", config.homeserver.url, admin);

    let context = MigrationContext::new(&db_manager, Arc::new(client));
    run(&cli.command, &config, &context).await?;

    let mappings = context.mappings.count_mappings(None).await?;
    let memberships = context.memberships.count_memberships().await?;
    info!("database holds {} mappings and {} memberships", mappings, memberships);

    info!("rocketchat2matrix finished");
    Ok(())
}

async fn run(command: &Command, config: &Config, context: &MigrationContext) -> Result<()> {
    match command {
        Command::Users => import_users(config, context).await,
        Command::Rooms => import_rooms(config, context).await,
        Command::Messages { file } => import_messages(&messages_path(config, file), context).await,
        Command::DirectMessages => reconcile_direct_messages(context).await,
        Command::MarkRead { file } => mark_read(&messages_path(config, file), context).await,
        Command::Notifications => import_notifications(config, context).await,
        Command::All => {
            let messages = config.migration.messages_path();
            import_users(config, context).await?;
            import_rooms(config, context).await?;
            import_messages(&messages, context).await?;
            reconcile_direct_messages(context).await?;
            mark_read(&messages, context).await?;
            import_notifications(config, context).await
        }
    }
}

fn messages_path(config: &Config, file: &Option<PathBuf>) -> PathBuf {
    file.clone()
        .unwrap_or_else(|| config.migration.messages_path())
}

async fn import_users(config: &Config, context: &MigrationContext) -> Result<()> {
    let importer = UserImporter::new(
        context.clone(),
        config.admin.clone(),
        SecretString::from(config.homeserver.registration_shared_secret.clone()),
        &config.migration.excluded_users,
    );
    importer
        .import_file(&config.migration.users_path())
        .await
        .context("user import failed")?;
    Ok(())
}

async fn import_rooms(config: &Config, context: &MigrationContext) -> Result<()> {
    RoomImporter::new(context.clone())
        .import_file(&config.migration.rooms_path())
        .await
        .context("room import failed")?;
    Ok(())
}

async fn import_messages(path: &Path, context: &MigrationContext) -> Result<()> {
    MessageImporter::new(context.clone())
        .import_file(path)
        .await
        .context("message import failed")?;
    Ok(())
}

async fn reconcile_direct_messages(context: &MigrationContext) -> Result<()> {
    DirectMessageReconciler::new(context.clone())
        .reconcile()
        .await
        .context("direct message reconciliation failed")?;
    Ok(())
}

async fn mark_read(path: &Path, context: &MigrationContext) -> Result<()> {
    let last = LastRoomMessages::from_export(path)
        .with_context(|| format!("failed to scan {}", path.display()))?;
    if last.is_empty() {
        info!("no messages in {}, nothing to mark read", path.display());
        return Ok(());
    }
    ReadStatePropagator::new(context.clone())
        .propagate(&last)
        .await
        .context("read state propagation failed")?;
    Ok(())
}

async fn import_notifications(config: &Config, context: &MigrationContext) -> Result<()> {
    NotificationImporter::new(context.clone(), config.migration.email_brand.clone())
        .import_file(&config.migration.users_path())
        .await
        .context("notification import failed")?;
    Ok(())
}
