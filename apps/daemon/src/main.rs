mod cli;

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use rephrase_core::Config;
use rephrase_engine::{ensure_server_ready, skill_for, Dispatcher, StartupOptions, TriggerRunner};
use rephrase_observability::{data_dir, logging, panic_log, safe_eprintln, TraceOptions, Tracer};
use rephrase_platform::{input_backend, HotkeyListener};
use rephrase_providers::{ModelTimeouts, OllamaClient};
use tokio::sync::mpsc;

use crate::cli::Cli;

const EXIT_STARTUP: u8 = 1;
const EXIT_LISTENER: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = match Config::from_env().and_then(|c| cli.apply(c)) {
        Ok(c) => c,
        Err(e) => {
            safe_eprintln!("rephrase: invalid configuration: {e:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    logging::init(cfg.debug);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to build async runtime: {e}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    block_on_then_abandon(rt, run(cfg, cli.check))
}

/// Runs `fut` to completion, then drops the runtime without waiting for
/// blocking tasks: an in-flight replace is abandoned on shutdown.
fn block_on_then_abandon<F: std::future::Future>(rt: tokio::runtime::Runtime, fut: F) -> F::Output {
    let out = rt.block_on(fut);
    rt.shutdown_background();
    out
}

async fn run(cfg: Config, check_only: bool) -> ExitCode {
    let dir = match data_dir::data_dir() {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    panic_log::install_best_effort(&dir);
    let tracer = Tracer::new(&dir, TraceOptions::from_env());

    tracing::info!(
        skill = %cfg.skill,
        model = %cfg.model,
        url = %cfg.base_url,
        shortcut = %cfg.shortcut_label(),
        backend = ?cfg.backend,
        "starting rephrase daemon"
    );
    tracing::debug!("data dir: {}", dir.display());

    let client = Arc::new(OllamaClient::new(
        &cfg.base_url,
        &cfg.model,
        ModelTimeouts::default(),
        tracer.clone(),
    ));
    let opts = StartupOptions::from_config(&cfg);
    if let Err(e) = ensure_server_ready(&client, &cfg.model, &opts, &tracer).await {
        tracing::error!("startup failed: {e:#}");
        return ExitCode::from(EXIT_STARTUP);
    }
    if check_only {
        tracing::info!("startup checks passed");
        return ExitCode::SUCCESS;
    }

    let (clipboard, paste) = input_backend(cfg.backend);
    let runner = TriggerRunner::new(skill_for(cfg.skill), clipboard, paste, client, tracer.clone())
        .with_metrics_dir(dir.clone());
    let dispatcher = Dispatcher::new(Arc::new(runner), tracer.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut listener = match HotkeyListener::spawn(cfg.trigger_digit, tx, tracer.clone()) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!("failed to start keyboard listener: {e:#}");
            return ExitCode::from(EXIT_LISTENER);
        }
    };
    tracing::info!(
        "listening for {} (select text, then press it); Ctrl+C to exit",
        cfg.shortcut_label()
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return ExitCode::SUCCESS;
            }
            failed = &mut listener.failed => {
                let reason = failed.unwrap_or_else(|_| "listener thread exited".to_string());
                tracing::error!("E_HK_LISTEN: keyboard listener failed: {reason}");
                return ExitCode::from(EXIT_LISTENER);
            }
            trigger = rx.recv() => match trigger {
                Some(t) => {
                    let _ = dispatcher.dispatch(t);
                }
                None => {
                    tracing::error!("E_HK_LISTEN: trigger channel closed");
                    return ExitCode::from(EXIT_LISTENER);
                }
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
