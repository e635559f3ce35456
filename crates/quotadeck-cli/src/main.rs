use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use quotadeck_core::models::{AccountUpdate, DisplayFilters, NotificationThreshold, ZaiAccount};
use quotadeck_core::store::SKIP_PASSWORD_KEY;
use quotadeck_core::{
    i18n, Account, AccountUsage, Config, CredentialStore, NotificationService, ProviderId,
    Settings, SettingsUpdate, UsageSnapshot,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod notifier;

use notifier::TerminalSink;

#[derive(Parser)]
#[command(name = "quotadeck")]
#[command(version, about = "Keep an eye on AI coding assistant quotas", long_about = None)]
struct Cli {
    /// Master password; not needed when the store was set up without one
    #[arg(long, global = true, env = "QUOTADECK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory holding auth.json and credentials.enc
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show lock state, accounts and settings
    Status,
    /// Set up the password (or run without one)
    Init {
        /// Use no password; credentials are only obfuscated on disk
        #[arg(long)]
        skip: bool,
    },
    /// Re-encrypt stored credentials under a new password
    ChangePassword {
        #[arg(long, env = "QUOTADECK_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
    /// Manage accounts
    #[command(subcommand)]
    Accounts(AccountCommands),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommands),
    /// Threshold alert tools
    #[command(subcommand)]
    Thresholds(ThresholdCommands),
}

#[derive(Subcommand)]
enum AccountCommands {
    /// List stored accounts
    List {
        /// Only this provider (antigravity, copilot, zai)
        #[arg(long)]
        provider: Option<ProviderId>,
    },
    /// Add a Z.ai account by API key
    AddZai {
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, env = "QUOTADECK_ZAI_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Change an account's display name
    Rename {
        provider: ProviderId,
        id: String,
        name: String,
    },
    /// Delete an account
    Remove { provider: ProviderId, id: String },
    /// Show or hide an account on the overview
    ShowInOverview {
        provider: ProviderId,
        id: String,
        #[arg(action = ArgAction::Set)]
        visible: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the current settings as JSON
    Show,
    /// Change one or more settings
    Set {
        /// Seconds between background refreshes
        #[arg(long)]
        refresh_interval: Option<u64>,
        #[arg(long)]
        background_refresh: Option<bool>,
        #[arg(long)]
        notifications: Option<bool>,
        /// en, zh-CN or ja
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        close_to_tray: Option<bool>,
        /// Comma separated remaining percentages, e.g. "25,10,5"
        #[arg(long)]
        thresholds: Option<String>,
    },
}

#[derive(Subcommand)]
enum ThresholdCommands {
    /// Replay usage snapshot batches and print the alerts they would raise
    Check {
        /// JSON file: a list of batches, each a list of account snapshots
        #[arg(long)]
        snapshots: PathBuf,
        /// Override the default thresholds, e.g. "25,10,5"
        #[arg(long)]
        thresholds: Option<String>,
        /// Also show native desktop notifications
        #[arg(long)]
        desktop: bool,
    },
}

/// One account's reading in a snapshot replay file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRecord {
    account_id: String,
    #[serde(default)]
    account_name: Option<String>,
    snapshot: UsageSnapshot,
}

impl SnapshotRecord {
    fn into_usage(self) -> AccountUsage {
        let name = self.account_name.unwrap_or_else(|| self.account_id.clone());
        AccountUsage::ok(self.snapshot.provider(), &self.account_id, &name, self.snapshot)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(e) = config_error {
        tracing::warn!("Using default config: {}", e);
    }

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("No command specified. Try --help");
        return Ok(());
    };

    let password = cli.password.as_deref();
    let data_dir = cli.data_dir.as_deref();

    match command {
        Commands::Status => {
            let (store, dir) = open_store(data_dir, &config)?;
            status(&store, &dir, password).await?;
        }
        Commands::Init { skip } => {
            let (store, _) = open_store(data_dir, &config)?;
            init(&store, password, skip).await?;
        }
        Commands::ChangePassword { new_password } => {
            let (store, _) = open_store(data_dir, &config)?;
            unlock(&store, password).await?;
            let old_password = if store.is_password_skipped().await? {
                SKIP_PASSWORD_KEY
            } else {
                password.context("Current password required")?
            };
            store
                .change_password(old_password, &new_password)
                .await
                .context("Failed to change password")?;
            println!("Password changed");
        }
        Commands::Accounts(cmd) => {
            let (store, _) = open_store(data_dir, &config)?;
            unlock(&store, password).await?;
            accounts(&store, cmd).await?;
        }
        Commands::Settings(cmd) => {
            let (store, _) = open_store(data_dir, &config)?;
            unlock(&store, password).await?;
            settings(&store, cmd).await?;
        }
        // Replaying snapshots never touches stored credentials
        Commands::Thresholds(ThresholdCommands::Check {
            snapshots,
            thresholds,
            desktop,
        }) => check_thresholds(&snapshots, thresholds.as_deref(), desktop)?,
    }

    Ok(())
}

/// CLI flag wins over QUOTADECK_DATA_DIR and the config file
fn open_store(
    data_dir: Option<&Path>,
    config: &Config,
) -> anyhow::Result<(CredentialStore, PathBuf)> {
    let dir = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => config.data_dir()?,
    };
    tracing::debug!("Data directory: {}", dir.display());
    Ok((CredentialStore::open(&dir), dir))
}

async fn unlock(store: &CredentialStore, password: Option<&str>) -> anyhow::Result<()> {
    if !store.has_password().await? {
        bail!("No password set up yet. Run `quotadeck init` first.");
    }

    if store.is_password_skipped().await? {
        store.unlock_skipped().await?;
    } else {
        let password =
            password.context("Password required: pass --password or set QUOTADECK_PASSWORD")?;
        if !store.try_unlock(password).await {
            bail!("Wrong password or damaged credential file");
        }
    }

    if let Some(e) = store.last_load_error().await {
        tracing::warn!("Stored credentials could not be read, showing an empty store: {}", e);
    }
    Ok(())
}

async fn status(
    store: &CredentialStore,
    data_dir: &Path,
    password: Option<&str>,
) -> anyhow::Result<()> {
    println!("Data directory: {}", data_dir.display());

    if !store.has_password().await? {
        println!("Not set up. Run `quotadeck init`.");
        return Ok(());
    }
    if store.is_password_skipped().await? {
        println!("Password: none (credentials are obfuscated, not encrypted)");
    } else {
        println!("Password: set");
    }

    if let Err(e) = unlock(store, password).await {
        println!("Locked: {}", e);
        return Ok(());
    }

    for provider in ProviderId::all() {
        let accounts = store.get_accounts(provider).await?;
        println!("{:<16} {} account(s)", provider.label(), accounts.len());
    }

    let settings = store.get_settings().await?;
    let thresholds: Vec<String> = settings
        .enabled_thresholds()
        .iter()
        .map(|t| format!("{}%", t))
        .collect();
    println!(
        "Refresh: every {}s{}",
        settings.refresh_interval,
        if settings.background_refresh { "" } else { " (background refresh off)" }
    );
    println!(
        "Alerts: {} at {}",
        if settings.notifications { "on" } else { "off" },
        thresholds.join(", ")
    );
    Ok(())
}

async fn init(store: &CredentialStore, password: Option<&str>, skip: bool) -> anyhow::Result<()> {
    if store.has_password().await? {
        bail!("Already set up. Use `quotadeck change-password` to change the password.");
    }

    if skip {
        store.skip_password().await?;
        println!(
            "Running without a password. \
             Anyone with access to this machine can read the stored tokens."
        );
    } else {
        let password =
            password.context("Password required: pass --password or set QUOTADECK_PASSWORD")?;
        if password.is_empty() {
            bail!("Password must not be empty");
        }
        store.set_password(password).await?;
        println!("Password set");
    }
    Ok(())
}

async fn accounts(store: &CredentialStore, cmd: AccountCommands) -> anyhow::Result<()> {
    match cmd {
        AccountCommands::List { provider } => {
            let providers = match provider {
                Some(p) => vec![p],
                None => ProviderId::all().to_vec(),
            };

            let mut rows = Vec::new();
            for provider in providers {
                rows.extend(store.get_accounts(provider).await?);
            }
            if rows.is_empty() {
                println!("No accounts");
                return Ok(());
            }
            for account in &rows {
                print_account(account);
            }
        }
        AccountCommands::AddZai { name, api_key } => {
            if api_key.trim().is_empty() {
                bail!("API key must not be empty");
            }
            let account = Account::Zai(ZaiAccount::new(&name, &api_key));
            store.save_account(ProviderId::ZaiCoding, account.clone()).await?;
            println!("Added {} ({})", account.display_name(), account.id());
        }
        AccountCommands::Rename { provider, id, name } => {
            let update = AccountUpdate {
                display_name: Some(name),
                ..Default::default()
            };
            if !store.update_account(provider, &id, update).await? {
                bail!("No {} account with id {}", provider.label(), id);
            }
            println!("Renamed");
        }
        AccountCommands::Remove { provider, id } => {
            store.delete_account(provider, &id).await?;
            println!("Removed");
        }
        AccountCommands::ShowInOverview { provider, id, visible } => {
            let update = AccountUpdate {
                show_in_overview: Some(visible),
                ..Default::default()
            };
            if !store.update_account(provider, &id, update).await? {
                bail!("No {} account with id {}", provider.label(), id);
            }
            println!("{}", if visible { "Shown on overview" } else { "Hidden from overview" });
        }
    }
    Ok(())
}

fn print_account(account: &Account) {
    println!(
        "{:<16} {:<38} {:<24} {}",
        account.provider().label(),
        account.id(),
        account.display_name(),
        if account.show_in_overview() { "" } else { "(hidden)" }
    );
}

async fn settings(store: &CredentialStore, cmd: SettingsCommands) -> anyhow::Result<()> {
    match cmd {
        SettingsCommands::Show => {
            let settings = store.get_settings().await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommands::Set {
            refresh_interval,
            background_refresh,
            notifications,
            language,
            close_to_tray,
            thresholds,
        } => {
            if let Some(lang) = &language {
                if !i18n::SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                    bail!(
                        "Unsupported language {}, expected one of {}",
                        lang,
                        i18n::SUPPORTED_LANGUAGES.join(", ")
                    );
                }
            }
            let update = SettingsUpdate {
                refresh_interval,
                background_refresh,
                notification_thresholds: thresholds.as_deref().map(parse_thresholds).transpose()?,
                notifications,
                language,
                close_to_tray,
            };
            let settings = store.save_settings(update).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}

fn parse_thresholds(raw: &str) -> anyhow::Result<Vec<NotificationThreshold>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| -> anyhow::Result<NotificationThreshold> {
            let value: f64 = part
                .trim_end_matches('%')
                .parse()
                .with_context(|| format!("Invalid threshold: {}", part))?;
            if !(0.0..=100.0).contains(&value) {
                bail!("Threshold {} is outside 0-100", value);
            }
            Ok(NotificationThreshold::new(value))
        })
        .collect()
}

fn check_thresholds(path: &Path, thresholds: Option<&str>, desktop: bool) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let batches: Vec<Vec<SnapshotRecord>> =
        serde_json::from_str(&contents).context("Snapshot file is not a list of batches")?;

    let mut settings = Settings {
        language: i18n::detect_language(),
        ..Settings::default()
    };
    if let Some(raw) = thresholds {
        settings.notification_thresholds = parse_thresholds(raw)?;
    }

    let service = NotificationService::new(Arc::new(TerminalSink::new(desktop)));
    let filters = DisplayFilters::default();

    for (i, batch) in batches.into_iter().enumerate() {
        println!("Batch {}:", i + 1);
        let usage: Vec<AccountUsage> = batch.into_iter().map(SnapshotRecord::into_usage).collect();
        if service.check_and_notify(&usage, &settings, &filters).is_empty() {
            println!("    no alerts");
        }
    }
    Ok(())
}
