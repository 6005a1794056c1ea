// MAMA OS — `mama-osd` daemon entrypoint.
//
// Wires every component together (config -> store -> role manager -> tool
// executor -> runner -> rate limiter -> orchestrator), spawns whichever
// gateways the config enables, and drives the cron scheduler on a fixed
// tick. Shutdown is signal-driven (SIGINT/SIGTERM) so systemd/launchd can
// stop the process cleanly.

use std::sync::Arc;

use log::{error, info};

use mama_core::atoms::error::EngineResult;
use mama_core::atoms::types::MamaConfig;
use mama_core::channel_key::MentionPolicy;
use mama_core::config::{self, ConfigHandle};
use mama_core::cron::CronScheduler;
use mama_core::gateways;
use mama_core::llm_runner::{self, RunnerBackendConfig};
use mama_core::orchestrator::Orchestrator;
use mama_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use mama_core::response_validator::ResponseValidator;
use mama_core::role_manager::RoleManager;
use mama_core::scope_guard::ScopeGuard;
use mama_core::sessions::SessionPool;
use mama_core::stop_continuation::StopContinuationHandler;
use mama_core::store::{self, Store};
use mama_core::tools::{self, GatewayToolExecutor};

#[tokio::main]
async fn main() -> EngineResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = config::default_config_path();
    let config = MamaConfig::load(&config_path)?;
    let config_handle = ConfigHandle::new(config.clone());
    info!("[mama-osd] loaded config from {}", config_path.display());

    let store = Arc::new(Store::open(&store::default_db_path())?);
    let sessions = Arc::new(SessionPool::new(store.clone()));
    let role_manager = RoleManager::new(config.source_roles.clone(), config.roles.clone());

    let mut tool_executor = GatewayToolExecutor::new();
    tools::builtins::register_all(&mut tool_executor);
    let tool_executor = Arc::new(tool_executor);

    let response_validator = ResponseValidator::new((&config.enforcement.response_validator).into());
    let scope_guard = ScopeGuard::new(config.enforcement.scope_guard.mode, config.enforcement.scope_guard.allowed_patterns.clone());
    let stop_continuation =
        StopContinuationHandler::new(config::build_stop_continuation_config(&config.multi_agent.task_continuation, &config.stop_continuation));

    let rate_limiter = RateLimiter::new(RateLimiterConfig::from(&config.rate_limit));

    let runner_backend = match config.agent.backend.as_str() {
        "http" => RunnerBackendConfig::Http(mama_core::llm_runner::http::HttpRunnerConfig {
            default_model: config.agent.model.clone(),
            timeout_secs: config.agent.timeout_seconds,
            ..Default::default()
        }),
        _ => RunnerBackendConfig::Subprocess(mama_core::llm_runner::subprocess::SubprocessRunnerConfig {
            timeout_secs: config.agent.timeout_seconds,
            ..Default::default()
        }),
    };
    let runner = Arc::new(llm_runner::build_runner(runner_backend));

    let mention_policy = MentionPolicy::new();

    let orchestrator = Arc::new(Orchestrator::new(
        config.multi_agent.clone(),
        mention_policy,
        role_manager,
        store.clone(),
        sessions,
        rate_limiter.clone(),
        runner,
        tool_executor,
        response_validator,
        scope_guard,
        stop_continuation,
        mama_core::sandbox::SandboxConfig::default(),
    ));

    gateways::spawn_enabled(&config.gateways, orchestrator.clone(), rate_limiter.clone());

    let cron = CronScheduler::new(store.clone(), orchestrator.clone());
    let cron_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(mama_core::atoms::constants::CRON_TICK_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(e) = cron.tick().await {
                error!("[mama-osd] cron tick failed: {e}");
            }
        }
    });

    info!("[mama-osd] running, config hot-reload path: {}", config_path.display());
    let _ = config_handle.snapshot();

    shutdown_signal().await;
    info!("[mama-osd] shutdown signal received, stopping");
    cron_handle.abort();
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
