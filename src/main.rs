use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use branch_steward::actor::{Dispatcher, RepoContext};
use branch_steward::config::{FileConfig, Settings};
use branch_steward::git::{GitCli, sweep_workspaces};
use branch_steward::github::GitHubClient;
use branch_steward::persistence::StoreOptions;
use branch_steward::server::{AppState, build_router};
use branch_steward::services::{
    ChannelMergeQueue, JsonlEventStore, LoggingNotifier, MergeRequest, Platform,
    StaticUserDirectory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "branch_steward=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env().context("reading settings")?;
    let config = FileConfig::load(&settings.config_file).context("loading repository config")?;
    info!(
        repositories = config.repos.len(),
        users = config.users.len(),
        state_dir = %settings.state_dir.display(),
        "configuration loaded"
    );

    let swept = sweep_workspaces(&settings.workspace_dir).context("sweeping old workspaces")?;
    if swept > 0 {
        warn!(swept, "removed workspaces left by a previous run");
    }

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let consumer = tokio::spawn(log_merge_requests(queue_rx));

    let platform = Platform {
        github: GitHubClient::from_token(settings.github_token.clone())
            .context("building GitHub client")?,
        git: GitCli::new(settings.github_token.clone()),
        users: StaticUserDirectory::new(config.users),
        notifier: LoggingNotifier,
        queue: ChannelMergeQueue::new(queue_tx),
        events: JsonlEventStore::open(settings.state_dir.join("events.jsonl"))
            .context("opening event store")?,
    };

    let store = StoreOptions {
        checkpoint_bytes: settings.checkpoint_bytes,
        ..StoreOptions::default()
    };
    let contexts = config.repos.into_iter().map(|repo| RepoContext {
        repo: Arc::new(repo),
        state_dir: settings.state_dir.clone(),
        workspace_root: settings.workspace_dir.clone(),
        retry: settings.retry(),
        store: store.clone(),
    });
    let dispatcher = Arc::new(Dispatcher::new(contexts, Arc::new(platform)));
    dispatcher.start_all().await.context("starting actors")?;

    let app = build_router(AppState::new(dispatcher.clone(), settings.state_dir.clone()));
    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", settings.listen_addr))?;
    info!("listening on {}", settings.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    dispatcher.shutdown_all().await;
    consumer.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Stand-in consumer until a merge queue is attached: logs each request.
async fn log_merge_requests(mut rx: mpsc::UnboundedReceiver<MergeRequest>) {
    while let Some(request) = rx.recv().await {
        info!(
            repo = %request.repo,
            branch = %request.branch,
            pr = %request.pull_request.number,
            priority = request.priority,
            requested_by = %request.requested_by,
            "merge requested"
        );
    }
}
