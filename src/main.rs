use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ordis_agent::{Scheduler, SessionManager, TaskContext, TurnEngine};
use ordis_channels::{BindingSource, ChannelRouter, MessageProcessor};
use ordis_core::config::AppConfig;
use ordis_core::event::EventBus;
use ordis_core::hooks::HookManager;
use ordis_core::types::{ChannelMessage, RoutedMessage, RuntimeEvent, SessionId};
use ordis_eventlog::{EventLog, EventLogEntry};
use ordis_forge::scan_for_gaps;
use ordis_llm::FallbackChain;
use ordis_skills::{load_skills, SkillRegistry, SkillSource};
use ordis_tools::{ToolExecutor, ToolRegistry};

#[derive(Parser)]
#[command(name = "ordis", version, about = "Personal AI assistant runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ordis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runtime: router, scheduler, forge scan, and a CLI channel
    Run,
    /// Validate the config file and print a summary
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Run => run(config).await,
    }
}

fn check(config: &AppConfig) -> anyhow::Result<()> {
    println!("config ok");
    for agent in &config.agents {
        println!(
            "  agent '{}': model {} (+{} fallbacks), tools: {}",
            agent.id,
            agent.model,
            agent.fallbacks.len(),
            if agent.tools.is_empty() {
                "all".to_string()
            } else {
                agent.tools.join(", ")
            }
        );
    }
    for (name, provider) in &config.providers {
        println!("  provider '{}': kind {}", name, provider.kind);
    }
    if let Some(ref sched) = config.scheduler {
        for task in &sched.tasks {
            let when = task
                .schedule
                .clone()
                .or_else(|| task.interval_ms.map(|ms| format!("every {}ms", ms)))
                .unwrap_or_default();
            println!("  task '{}': {}", task.id, when);
        }
    }
    Ok(())
}

struct Runtime {
    config: Arc<AppConfig>,
    bus: Arc<EventBus>,
    event_log: Arc<EventLog>,
    engine: Arc<TurnEngine>,
    chains: Arc<HashMap<String, Arc<FallbackChain>>>,
    skills: Arc<SkillRegistry>,
    scheduler: Arc<Scheduler>,
    router: Arc<ChannelRouter>,
}

fn build_runtime(config: AppConfig) -> anyhow::Result<Runtime> {
    let config = Arc::new(config);
    let bus = Arc::new(EventBus::default());

    let event_log = Arc::new(match &config.event_log.path {
        Some(path) => EventLog::open(&AppConfig::resolve_path(path))?,
        None => EventLog::in_memory()?,
    });

    // Skills: bundled and curated are trusted, forged ran the gauntlet.
    let skills = Arc::new(SkillRegistry::new());
    for (dir, source) in [
        (&config.skills.bundled_dir, SkillSource::Bundled),
        (&config.skills.curated_dir, SkillSource::Curated),
        (&config.skills.forged_dir, SkillSource::Forged),
    ] {
        for skill in load_skills(&AppConfig::resolve_path(dir), source) {
            skills.insert(skill);
        }
    }

    let mut registry = ToolRegistry::with_builtins();
    let registered = skills.register_tools(&mut registry);
    info!(skills = registered, "Tool registry ready");

    let executor = Arc::new(ToolExecutor::new(
        Arc::new(tokio::sync::RwLock::new(registry)),
        Arc::clone(&event_log),
        config.timeouts.clone(),
    ));

    let hooks = Arc::new(HookManager::new(std::time::Duration::from_secs(
        config.timeouts.hook_secs,
    )));

    let sessions = Arc::new(SessionManager::new(config.session.idle_archive_secs));
    let engine = Arc::new(TurnEngine::new(
        executor,
        hooks,
        sessions,
        Arc::clone(&event_log),
        Arc::clone(&bus),
        config.session.reserve_floor,
    ));

    // One immutable chain per agent; every switch lands in the event log.
    let mut chains = HashMap::new();
    for agent in &config.agents {
        let log = Arc::clone(&event_log);
        let chain = ordis_llm::build_chain(&config, agent)?.with_on_fallback(Arc::new(
            move |from: &str, to: &str, reason: &str| {
                if let Err(e) = log.insert(EventLogEntry::fallback(from, to, reason)) {
                    error!(error = %e, "Failed to record fallback");
                }
            },
        ));
        chains.insert(agent.id.clone(), Arc::new(chain));
    }
    let chains = Arc::new(chains);

    let processor = make_processor(Arc::clone(&config), Arc::clone(&engine), Arc::clone(&chains));
    let bindings = make_bindings(Arc::clone(&config));
    let router = ChannelRouter::new(
        bindings,
        processor,
        Arc::clone(&event_log),
        Arc::clone(&bus),
        config.router.queue_capacity,
    );

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), Arc::clone(&event_log)));

    Ok(Runtime {
        config,
        bus,
        event_log,
        engine,
        chains,
        skills,
        scheduler,
        router,
    })
}

fn make_bindings(config: Arc<AppConfig>) -> Arc<dyn BindingSource> {
    Arc::new(move |message: &ChannelMessage| {
        config
            .routes
            .bindings
            .get(&message.channel)
            .or(config.routes.default_agent.as_ref())
            .cloned()
            .or_else(|| {
                config
                    .agents
                    .iter()
                    .find(|a| !a.subagent)
                    .map(|a| a.id.clone())
            })
    })
}

fn make_processor(
    config: Arc<AppConfig>,
    engine: Arc<TurnEngine>,
    chains: Arc<HashMap<String, Arc<FallbackChain>>>,
) -> Arc<dyn MessageProcessor> {
    Arc::new(move |routed: RoutedMessage| -> BoxFuture<'static, ()> {
        let config = Arc::clone(&config);
        let engine = Arc::clone(&engine);
        let chains = Arc::clone(&chains);
        Box::pin(async move {
            let Some(agent) = config.agent(&routed.agent_id) else {
                error!(agent = %routed.agent_id, "Routed to unknown agent");
                return;
            };
            let Some(chain) = chains.get(&routed.agent_id) else {
                error!(agent = %routed.agent_id, "No provider chain for agent");
                return;
            };
            if let Err(e) = engine
                .run_turn(
                    agent,
                    chain,
                    &routed.message.channel,
                    &routed.message.sender,
                    &routed.message.content,
                    CancellationToken::new(),
                )
                .await
            {
                warn!(error = %e, session = %routed.session_id, "Turn failed");
            }
        })
    })
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;

    // Configured tasks request work through the bus; a relay below feeds the
    // requests back into the router like any other producer.
    if let Some(ref sched_config) = runtime.config.scheduler {
        for task in &sched_config.tasks {
            if !task.enabled {
                continue;
            }
            let handler: Arc<dyn ordis_agent::TaskHandler> = Arc::new(
                move |ctx: TaskContext| -> BoxFuture<'static, ordis_core::error::Result<()>> {
                    let payload = ctx.payload.clone();
                    Box::pin(async move {
                        ctx.request_work(payload);
                        Ok(())
                    })
                },
            );
            if let Some(ref expr) = task.schedule {
                runtime
                    .scheduler
                    .add_cron_task(&task.id, expr, task.payload.clone(), handler)?;
            } else if let Some(interval_ms) = task.interval_ms {
                runtime
                    .scheduler
                    .add_interval_task(&task.id, interval_ms, task.payload.clone(), handler)?;
            }
        }
    }

    // Periodic forge scan over the event log.
    if runtime.config.forge.enabled {
        let log = Arc::clone(&runtime.event_log);
        let skills = Arc::clone(&runtime.skills);
        let window_days = runtime.config.forge.scan_window_days;
        let handler: Arc<dyn ordis_agent::TaskHandler> = Arc::new(
            move |_ctx: TaskContext| -> BoxFuture<'static, ordis_core::error::Result<()>> {
                let log = Arc::clone(&log);
                let skills = Arc::clone(&skills);
                Box::pin(async move {
                    let gaps = scan_for_gaps(&log, &skills, window_days, &[]);
                    if !gaps.is_empty() {
                        info!(count = gaps.len(), "Capability gaps detected");
                    }
                    Ok(())
                })
            },
        );
        runtime.scheduler.add_interval_task(
            "forge_scan",
            runtime.config.forge.scan_interval_secs * 1000,
            serde_json::Value::Null,
            handler,
        )?;
    }

    // Hourly sweep of idle sessions into the archive.
    {
        let sessions = runtime.engine.sessions();
        let handler: Arc<dyn ordis_agent::TaskHandler> = Arc::new(
            move |_ctx: TaskContext| -> BoxFuture<'static, ordis_core::error::Result<()>> {
                let sessions = Arc::clone(&sessions);
                Box::pin(async move {
                    sessions.archive_idle();
                    Ok(())
                })
            },
        );
        runtime.scheduler.add_interval_task(
            "session_sweep",
            3_600_000,
            serde_json::Value::Null,
            handler,
        )?;
    }

    runtime.scheduler.start();

    // Relay task:execute requests into the router.
    {
        let router = Arc::clone(&runtime.router);
        let mut rx = runtime.bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let RuntimeEvent::TaskExecute { task_id, payload } = event {
                    let content = payload
                        .get("prompt")
                        .and_then(|p| p.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if content.is_empty() {
                        continue;
                    }
                    let message = ChannelMessage {
                        channel: payload
                            .get("channel")
                            .and_then(|c| c.as_str())
                            .unwrap_or("scheduler")
                            .to_string(),
                        sender: task_id,
                        content,
                        metadata: None,
                    };
                    if let Err(e) = router.dispatch(message) {
                        warn!(error = %e, "Failed to route scheduled message");
                    }
                }
            }
        });
    }

    info!(
        agents = runtime.config.agents.len(),
        providers = runtime.chains.len(),
        "Ordis running; type a message, ctrl-d to exit"
    );

    // Minimal interactive channel: stdin in, streamed deltas out.
    let cli_session = SessionId::for_pair("cli", "operator");
    {
        let mut rx = runtime.bus.subscribe();
        let session = cli_session.clone();
        tokio::spawn(async move {
            use std::io::Write;
            while let Ok(event) = rx.recv().await {
                match event {
                    RuntimeEvent::TextDelta { session_id, text } if session_id == session => {
                        print!("{}", text);
                        std::io::stdout().flush().ok();
                    }
                    RuntimeEvent::TurnComplete { session_id, .. } if session_id == session => {
                        println!();
                    }
                    RuntimeEvent::TurnError { session_id, error } if session_id == session => {
                        eprintln!("error: {}", error);
                    }
                    _ => {}
                }
            }
        });
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = tokio::io::AsyncBufReadExt::lines(stdin);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        runtime.router.dispatch(ChannelMessage {
                            channel: "cli".into(),
                            sender: "operator".into(),
                            content: line,
                            metadata: None,
                        })?;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    runtime.scheduler.stop();
    let _ = runtime.engine.sessions().archive_idle();
    info!("Ordis shutting down");
    Ok(())
}
