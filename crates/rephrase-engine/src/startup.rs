use std::time::Duration;

use anyhow::{anyhow, Result};
use rephrase_core::Config;
use rephrase_observability::Tracer;
use rephrase_platform::process::run_tool;
use rephrase_providers::{HealthProbe, OllamaClient};
use serde_json::json;

const START_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct StartupOptions {
    /// Try to start the model server when the first health check fails.
    pub autostart: bool,
    pub start_command: Vec<String>,
    pub autostart_wait: Duration,
    pub recheck_timeout: Duration,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            autostart: true,
            start_command: ["systemctl", "--user", "start", "ollama"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            autostart_wait: Duration::from_secs(3),
            recheck_timeout: Duration::from_secs(10),
        }
    }
}

impl StartupOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            autostart: cfg.autostart_server,
            ..Self::default()
        }
    }
}

async fn run_start_command(cmd: &[String]) -> Result<()> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| anyhow!("E_SERVER_START: empty start command"))?;
    let program = program.clone();
    let args = args.to_vec();
    let out = tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_tool(&program, &args, None, false, START_COMMAND_TIMEOUT)
    })
    .await
    .map_err(|e| anyhow!("E_SERVER_START: start task failed: {e}"))?
    .map_err(|e| anyhow!("E_SERVER_START: {e}"))?;
    if !out.status.success() {
        return Err(anyhow!(
            "E_SERVER_START: start command exited with {}",
            out.status
        ));
    }
    Ok(())
}

async fn ensure_reachable(client: &OllamaClient, opts: &StartupOptions) -> Result<()> {
    match client.probe_health().await {
        HealthProbe::Up => {
            tracing::info!("model server is running at {}", client.base_url());
            return Ok(());
        }
        // Something answers; starting another server would not help.
        HealthProbe::BadStatus(status) => {
            return Err(anyhow!(
                "E_SERVER_UNHEALTHY: model server at {} answered {status}",
                client.base_url()
            ));
        }
        HealthProbe::Unreachable => {}
    }
    tracing::warn!("model server is not running at {}", client.base_url());
    if !opts.autostart {
        return Err(anyhow!(
            "E_SERVER_UNREACHABLE: model server is not reachable at {}",
            client.base_url()
        ));
    }

    tracing::info!("attempting to start the model server: {}", opts.start_command.join(" "));
    if let Err(e) = run_start_command(&opts.start_command).await {
        tracing::error!("failed to start the model server: {e:#}");
        return Err(e);
    }
    tokio::time::sleep(opts.autostart_wait).await;

    if client.check_health_within(opts.recheck_timeout).await {
        tracing::info!("model server started successfully");
        return Ok(());
    }
    Err(anyhow!(
        "E_SERVER_UNREACHABLE: model server still not reachable at {} after start",
        client.base_url()
    ))
}

/// Health check, optional autostart, model pull, warm-up. Any failure is fatal.
pub async fn ensure_server_ready(
    client: &OllamaClient,
    model: &str,
    opts: &StartupOptions,
    tracer: &Tracer,
) -> Result<()> {
    let span = tracer.span(
        None,
        "Startup",
        "STARTUP.server_ready",
        Some(json!({"model": model, "autostart": opts.autostart})),
    );

    let res = async {
        ensure_reachable(client, opts).await?;
        if !client.ensure_model_available(model).await {
            return Err(anyhow!("E_MODEL_UNAVAILABLE: model '{model}' is not available"));
        }
        if !client.warmup_test(model).await {
            return Err(anyhow!("E_MODEL_WARMUP: model '{model}' did not answer the test request"));
        }
        Ok(())
    }
    .await;

    match &res {
        Ok(()) => span.ok(None),
        Err(e) => {
            let msg = e.to_string();
            let code = msg.split(':').next().unwrap_or("E_STARTUP");
            span.err_anyhow("startup", code, e, None);
        }
    }
    res
}
