use agent_core::{
    ActivityRecord, ActivityStore, ConfigUpdate, ExplicitAction, RunError, RunRequest, Settings,
    TriggerKind,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use database::Database;
use heartbeat_service::{AgentRunner, AgentStatus, Collaborators, DecisionPipeline, Scheduler};
use llm_interface::{LlmConfig, OpenRouterProvider};
use moltbook_client::{FeedSort, MoltbookClient, MoltbookConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "moltbook_agent=info,heartbeat_service=info,moltbook_client=info,llm_interface=info,database=info";

/// Autonomous Moltbook agent: observe the feed, decide, draft, evaluate, act.
#[derive(Debug, Parser)]
#[command(name = "moltbook-agent", version)]
struct Cli {
    /// Settings file (TOML). Secrets may also come from the environment.
    #[arg(long, global = true, env = "MOLTBOOK_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the heartbeat scheduler until Ctrl-C. On Unix, SIGUSR1 queues a
    /// manual run without waiting for the next tick.
    Daemon,

    /// Run the pipeline once and print the activity record.
    Run {
        /// Extra guidance handed to the decision prompt.
        #[arg(long)]
        context: Option<String>,
    },

    /// Publish a post, bypassing the decision step.
    Post {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        submolt: Option<String>,
    },

    /// Comment on a post in the current feed. Without `--content` the
    /// comment is drafted and evaluated first.
    Comment {
        #[arg(long)]
        post_id: String,
        #[arg(long)]
        content: Option<String>,
    },

    /// Show the last run, the last error and today's post count.
    Status,

    /// Browse the Moltbook feed without running the pipeline.
    Feed {
        /// hot, new, top or rising.
        #[arg(long, default_value = "hot")]
        sort: FeedSort,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show this agent's Moltbook profile.
    Profile,

    /// List recent activity, newest first.
    Activity {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Inspect or change the runtime configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,

    /// Change one or more settings. Takes effect from the next run.
    Set {
        #[arg(long)]
        autonomous_mode: Option<bool>,
        #[arg(long)]
        heartbeat_interval_seconds: Option<u64>,
        #[arg(long)]
        max_posts_per_day: Option<u32>,
        #[arg(long)]
        post_cooldown_seconds: Option<u64>,
        /// Comma-separated.
        #[arg(long, value_delimiter = ',')]
        topics: Option<Vec<String>>,
        /// Comma-separated.
        #[arg(long, value_delimiter = ',')]
        style_hints: Option<Vec<String>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    let database = Arc::new(open_database(&settings).await?);
    let result = dispatch(cli.command, &settings, database.clone()).await;
    database.close().await;
    result
}

async fn open_database(settings: &Settings) -> Result<Database> {
    let mut database = Database::new(settings.database.url.clone());
    database
        .connect()
        .await
        .with_context(|| format!("failed to open {}", settings.database.url))?;
    database.run_migrations().await?;
    database.initialize(&settings.defaults).await?;
    Ok(database)
}

fn moltbook_client(settings: &Settings) -> Result<MoltbookClient> {
    Ok(MoltbookClient::new(MoltbookConfig::from_settings(
        &settings.moltbook,
        settings.moltbook_api_key()?,
    ))?)
}

fn build_pipeline(settings: &Settings, store: Arc<Database>) -> Result<Arc<DecisionPipeline>> {
    let moltbook = Arc::new(moltbook_client(settings)?);
    let llm = Arc::new(OpenRouterProvider::new(LlmConfig::from_settings(
        &settings.llm,
        settings.llm_api_key()?,
    ))?);

    let collaborators = Collaborators {
        feed: moltbook.clone(),
        generator: llm.clone(),
        evaluator: llm,
        executor: moltbook,
        store,
    };
    Ok(Arc::new(DecisionPipeline::new(
        collaborators,
        settings.agent.clone(),
    )))
}

async fn dispatch(command: Command, settings: &Settings, database: Arc<Database>) -> Result<()> {
    match command {
        Command::Daemon => {
            // Only the daemon may clear a flag left by a crashed run; a
            // one-shot command could be racing a live daemon.
            database.recover_stale_state().await?;
            let pipeline = build_pipeline(settings, database)?;
            daemon(pipeline, settings.agent.run_on_start).await
        }
        Command::Run { context } => {
            let runner = AgentRunner::new(build_pipeline(settings, database)?);
            let result = runner
                .trigger_sync(RunRequest::manual(TriggerKind::ManualSync, context))
                .await;
            report_run(result)
        }
        Command::Post {
            title,
            content,
            submolt,
        } => {
            let runner = AgentRunner::new(build_pipeline(settings, database)?);
            let result = runner
                .trigger_sync(RunRequest::direct(ExplicitAction::Post {
                    title: Some(title),
                    content: Some(content),
                    submolt,
                }))
                .await;
            report_run(result)
        }
        Command::Comment { post_id, content } => {
            let runner = AgentRunner::new(build_pipeline(settings, database)?);
            let result = runner
                .trigger_sync(RunRequest::direct(ExplicitAction::Comment {
                    item_id: post_id,
                    content,
                }))
                .await;
            report_run(result)
        }
        Command::Status => print_json(&AgentStatus::load(database.as_ref(), false).await?),
        Command::Feed { sort, limit } => {
            let items = moltbook_client(settings)?.browse(sort, limit).await?;
            print_json(&items)
        }
        Command::Profile => print_json(&moltbook_client(settings)?.profile().await?),
        Command::Activity { limit } => print_json(&database.list_activity(limit).await?),
        Command::Config { command } => match command {
            ConfigCommand::Show => print_json(&database.get_config().await?),
            ConfigCommand::Set {
                autonomous_mode,
                heartbeat_interval_seconds,
                max_posts_per_day,
                post_cooldown_seconds,
                topics,
                style_hints,
            } => {
                let update = ConfigUpdate {
                    autonomous_mode,
                    heartbeat_interval_seconds,
                    max_posts_per_day,
                    post_cooldown_seconds,
                    topics,
                    style_hints,
                };
                if update.is_empty() {
                    bail!("nothing to update; pass at least one setting");
                }
                print_json(&database.set_config(&update).await?)
            }
        },
    }
}

async fn daemon(pipeline: Arc<DecisionPipeline>, run_on_start: bool) -> Result<()> {
    let config = pipeline.current_config().await?;
    let runner = AgentRunner::new(pipeline.clone());
    let scheduler = Scheduler::new(pipeline, run_on_start);
    scheduler
        .start(Duration::from_secs(config.heartbeat_interval_seconds))
        .await;

    info!(
        "Agent running (autonomous mode {}). Press Ctrl-C to stop.",
        if config.autonomous_mode { "on" } else { "off" }
    );
    serve_signals(&runner).await?;

    info!("Shutting down, waiting for any in-flight run");
    scheduler.stop().await;
    runner.settle().await;
    Ok(())
}

/// Returns on Ctrl-C. Each SIGUSR1 queues a manual run.
#[cfg(unix)]
async fn serve_signals(runner: &AgentRunner) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut wake = signal(SignalKind::user_defined1()).context("failed to listen for SIGUSR1")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                return result.context("failed to listen for Ctrl-C");
            }
            Some(()) = wake.recv() => {
                let trigger = runner
                    .trigger_async(RunRequest::manual(TriggerKind::ManualAsync, None))
                    .await;
                info!("SIGUSR1 received, manual run {:?}", trigger);
            }
        }
    }
}

#[cfg(not(unix))]
async fn serve_signals(_runner: &AgentRunner) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}

/// Print the run's record, including for faults that still logged one.
fn report_run(result: Result<ActivityRecord, RunError>) -> Result<()> {
    match result {
        Ok(record) => print_json(&record),
        Err(e) => {
            if let Some(record) = e.record() {
                print_json(record)?;
            }
            Err(e.into())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
