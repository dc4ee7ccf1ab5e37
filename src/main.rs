use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use pomoguard_lib::{
    allowlist::{AllowListPersistence, AllowListStore},
    data_dir,
    summary::SummaryClient,
    timer::PomodoroState,
    utils::logging,
    ControllerConfig, Database, OsascriptObserver, SettingsStore, TimerController, TimerEvent,
};

const DATABASE_FILE: &str = "pomoguard.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Parser)]
#[command(name = "pomoguard", version, about = "Focus timer that notices when you drift")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one focus session, printing timer events as JSON lines
    Run {
        /// Focus length in minutes (defaults to the configured value)
        #[arg(long)]
        minutes: Option<u32>,
        /// Extra application allowed for this session only (repeatable)
        #[arg(long = "also-allow")]
        also_allow: Vec<String>,
    },
    /// Show or change timer preferences
    Config {
        #[arg(long)]
        focus_minutes: Option<u32>,
        #[arg(long)]
        break_minutes: Option<u32>,
        #[arg(long)]
        success_hold_secs: Option<u64>,
        #[arg(long)]
        top_apps: Option<usize>,
    },
    /// Always allow an application by bundle identifier
    AllowApp { app_id: String },
    /// Stop allowing an application
    DisallowApp { app_id: String },
    /// Add a website rule (subdomains included)
    AllowSite { domain: String },
    /// List allowed applications and website rules
    Rules,
    /// Enable or disable a website rule
    ToggleRule { id: Uuid },
    /// Delete a website rule
    RemoveRule { id: Uuid },
    /// List recent sessions with their top apps
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Show one session and its app usage
    Show { session_id: String },
    /// Save a reflection note for a session
    Note { session_id: String, text: String },
}

struct AppContext {
    settings: Arc<SettingsStore>,
    db: Database,
}

impl AppContext {
    fn open() -> Result<Self> {
        let dir = data_dir()?;
        let settings = Arc::new(SettingsStore::new(dir.join(SETTINGS_FILE))?);
        let db = Database::new(dir.join(DATABASE_FILE))?;
        Ok(Self { settings, db })
    }

    fn allow_list(&self) -> Result<AllowListStore> {
        let prefs = self.settings.timer()?;
        let persistence: Arc<dyn AllowListPersistence> = self.settings.clone();
        AllowListStore::load(prefs.own_app_id, persistence)
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    let ctx = AppContext::open()?;

    match command {
        Commands::Run {
            minutes,
            also_allow,
        } => run_session(&ctx, minutes, &also_allow).await,
        Commands::Config {
            focus_minutes,
            break_minutes,
            success_hold_secs,
            top_apps,
        } => {
            let mut prefs = ctx.settings.timer()?;
            let before = prefs.clone();
            if let Some(minutes) = focus_minutes {
                prefs.focus_minutes = minutes;
            }
            if let Some(minutes) = break_minutes {
                prefs.break_minutes = minutes;
            }
            if let Some(secs) = success_hold_secs {
                prefs.success_hold_secs = secs;
            }
            if let Some(limit) = top_apps {
                prefs.top_apps_limit = limit;
            }
            if prefs.focus_minutes == 0 {
                bail!("focus length must be at least one minute");
            }
            if prefs != before {
                ctx.settings.update_timer(prefs.clone())?;
            }
            let output = serde_json::json!({
                "path": ctx.settings.path().display().to_string(),
                "timer": prefs,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::AllowApp { app_id } => {
            let mut store = ctx.allow_list()?;
            if store.allow_application(&app_id) {
                println!("allowed {app_id}");
            } else {
                println!("{app_id} was already allowed");
            }
            Ok(())
        }
        Commands::DisallowApp { app_id } => {
            let mut store = ctx.allow_list()?;
            if !store.disallow_application(&app_id) {
                bail!("{app_id} is not on the allow-list");
            }
            println!("removed {app_id}");
            Ok(())
        }
        Commands::AllowSite { domain } => {
            let mut store = ctx.allow_list()?;
            match store.add_domain_rule(&domain) {
                Some(id) => {
                    println!("{id}");
                    Ok(())
                }
                None => bail!("{domain:?} is not a usable domain"),
            }
        }
        Commands::Rules => {
            let store = ctx.allow_list()?;
            let output = serde_json::json!({
                "ownAppId": store.own_app_id(),
                "applications": store.allowed_applications().collect::<Vec<_>>(),
                "domainRules": store.rules(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::ToggleRule { id } => {
            let mut store = ctx.allow_list()?;
            if !store.toggle_rule(id) {
                bail!("no rule with id {id}");
            }
            Ok(())
        }
        Commands::RemoveRule { id } => {
            let mut store = ctx.allow_list()?;
            if !store.remove_rule(id) {
                bail!("no rule with id {id}");
            }
            Ok(())
        }
        Commands::History { limit, offset } => {
            let top_n = ctx.settings.timer()?.top_apps_limit;
            let items = ctx.db.list_session_items(limit, offset, top_n).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(())
        }
        Commands::Show { session_id } => {
            let session = ctx
                .db
                .get_session(&session_id)
                .await?
                .with_context(|| format!("session {session_id} not found"))?;
            let usage = ctx.db.get_app_usage_for_session(&session_id).await?;
            let output = serde_json::json!({ "session": session, "usage": usage });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::Note { session_id, text } => {
            if !ctx.db.update_session_summary(&session_id, &text, true).await? {
                bail!("session {session_id} not found");
            }
            Ok(())
        }
    }
}

async fn run_session(ctx: &AppContext, minutes: Option<u32>, also_allow: &[String]) -> Result<()> {
    let prefs = ctx.settings.timer()?;
    let summary = match SummaryClient::from_env() {
        Ok(client) => Some(client),
        Err(err) => {
            log::info!("AI summaries off: {err}");
            None
        }
    };

    let controller = TimerController::new(
        ctx.db.clone(),
        ctx.allow_list()?,
        Arc::new(OsascriptObserver::new()),
        summary,
        ControllerConfig::from_preferences(&prefs),
    );
    let mut events = controller.subscribe();

    controller
        .start(minutes.unwrap_or(prefs.focus_minutes))
        .await?;
    for app_id in also_allow {
        controller.allow_for_session(app_id).await?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let TimerEvent::TimerStateChanged(snapshot) = &event {
                        if snapshot.state == PomodoroState::Idle {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => log::warn!("Dropped {skipped} timer events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = controller.finish().await {
                    log::warn!("Nothing to finish: {err}");
                }
                break;
            }
        }
    }

    Ok(())
}
