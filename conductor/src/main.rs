use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use conductor::actors::conductor::{
    ActorRegistry, ActorSpec, ChannelObserver, ObserverEvent, SchedulerArguments,
    ScriptedProvider, TurnScheduler,
};
use conductor::actors::transcript_store::{TranscriptStoreArguments, TranscriptStoreHandle};
use conductor::cache::{spawn_expiry_sweeper, CompletionCache};
use conductor::config::{self, ConductorConfig, KeywordRoute, RoutingConfig, SequenceStep};
use shared_types::ActorRole;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Routing used when no routing file is configured.
fn demo_routing() -> RoutingConfig {
    RoutingConfig {
        default_actor: Some("planner".to_string()),
        keyword_routes: vec![KeywordRoute {
            actor: "reviewer".to_string(),
            keywords: vec!["review".to_string(), "audit".to_string()],
        }],
        sequence: vec![
            SequenceStep {
                from: "planner".to_string(),
                to: "coder".to_string(),
            },
            SequenceStep {
                from: "coder".to_string(),
                to: "reviewer".to_string(),
            },
        ],
    }
}

fn demo_registry() -> anyhow::Result<ActorRegistry> {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_reply(
                "planner",
                "Plan: split the work into a parser and a test suite.",
            )
            .with_reply("coder", "Implemented the parser and its tests.")
            .with_reply("reviewer", "Checked both parts, they look correct. TERMINATE")
            .with_fragment_delay(std::time::Duration::from_millis(15)),
    );

    ActorRegistry::new(vec![
        ActorSpec::new("planner", ActorRole::Manager, provider.clone()),
        ActorSpec::new("coder", ActorRole::Worker, provider.clone()),
        ActorSpec::new("reviewer", ActorRole::Worker, provider),
    ])
    .context("Failed to build actor registry")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before the subscriber, so RUST_LOG from .env takes effect.
    let dotenv = config::load_dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // Structured JSON logs for log pipelines, plain text otherwise.
    if std::env::var("CONDUCTOR_LOG_JSON").is_ok_and(|v| v == "1" || v == "true") {
        builder.json().init();
    } else {
        builder.init();
    }

    match dotenv {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "Loaded environment from .env"),
        Ok(None) => tracing::debug!("No .env file found; using process environment only"),
        Err(e) => tracing::warn!(error = %e, "Failed to load .env file"),
    }

    let request = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    if request.trim().is_empty() {
        anyhow::bail!("usage: conductor <request>");
    }

    let mut config = ConductorConfig::from_env()?;
    if config.routing == RoutingConfig::default() {
        tracing::info!("No routing file configured; using demo routing");
        config.routing = demo_routing();
    }

    let cache = CompletionCache::shared(&config.cache);
    let shutdown = CancellationToken::new();
    let sweeper = spawn_expiry_sweeper(
        cache.clone(),
        config.cache.sweep_interval,
        shutdown.clone(),
    );

    let store_args = match std::env::var("CONDUCTOR_TRANSCRIPT_DIR") {
        Ok(dir) => TranscriptStoreArguments::Directory(PathBuf::from(dir)),
        Err(_) => TranscriptStoreArguments::InMemory,
    };
    let (store, store_handle) = TranscriptStoreHandle::spawn(store_args)
        .await
        .context("Failed to start transcript store")?;

    let (observer, mut events) = ChannelObserver::new();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            let _ = match event {
                ObserverEvent::TurnStarted { actor, cached } => {
                    let suffix = if cached { " (cached)" } else { "" };
                    write!(stdout, "\n[{actor}{suffix}] ")
                }
                ObserverEvent::Fragment { text, .. } => write!(stdout, "{text}"),
                ObserverEvent::TurnFinished { failed: true, .. } => write!(stdout, " <failed>"),
                ObserverEvent::TurnFinished { .. } => Ok(()),
            };
            let _ = stdout.flush();
        }
    });

    let args = SchedulerArguments::new(
        request,
        Arc::new(demo_registry()?),
        cache.clone(),
        Arc::new(store.clone()),
    )
    .with_routing(config.routing.clone())
    .with_config(config.scheduler.clone())
    .with_observer(Arc::new(observer));

    let scheduler = TurnScheduler::new(args)?;
    let cancel = scheduler.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; cancelling session");
            cancel.cancel();
        }
    });

    let report = scheduler.run().await;
    ctrl_c.abort();
    let _ = printer.await;

    println!("\n\n== session {} ({}) ==", report.session_id, report.status.as_str());
    for message in report.transcript.iter() {
        let speaker = message
            .actor_name
            .as_deref()
            .unwrap_or(message.role.as_str());
        println!("{speaker:>10}: {}", message.content);
    }
    match &report.persistence {
        Ok(handle) => println!("transcript saved to {}", handle.location),
        Err(e) => println!("transcript not saved: {e}"),
    }

    shutdown.cancel();
    let _ = sweeper.await;
    cache.shutdown();
    store.stop();
    let _ = store_handle.await;

    Ok(())
}
