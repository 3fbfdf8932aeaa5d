mod manifest;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use relay_engine::{ContractRouter, Debouncer, RouterSettings, default_config_path, save_settings_to_path};
use relay_types::{Contract, ExecutionResult};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::manifest::load_manifest;

/// Route contracts declared in a manifest through the relay pipeline.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Manifest describing settings, providers and contracts (.json, .yaml or .yml).
    #[arg(long, short, default_value = "relay.yaml")]
    manifest: PathBuf,

    /// Router settings file; overrides the manifest's `settings` block.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered contracts and providers.
    List,
    /// Print the resolved router settings.
    Settings {
        /// Also write them to the settings file.
        #[arg(long)]
        save: bool,
    },
    /// Execute a contract by kind or method.
    Call {
        /// Contract kind or method name.
        contract: String,
        /// Override the contract path.
        #[arg(long)]
        path: Option<String>,
        /// JSON payload.
        #[arg(long)]
        payload: Option<String>,
        /// Extra header as `name=value`; repeatable.
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        /// Number of calls to issue.
        #[arg(long, default_value_t = 1)]
        repeat: usize,
        /// Submit the calls concurrently through the debounce wrapper.
        #[arg(long)]
        debounce: bool,
        /// Print the execution history afterwards.
        #[arg(long)]
        history: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let manifest = load_manifest(&cli.manifest).with_context(|| format!("load manifest {}", cli.manifest.display()))?;
    let settings = manifest
        .resolve_settings(cli.settings.as_deref())
        .context("resolve router settings")?;
    let router = manifest
        .build_router_with(settings.clone())
        .context("build router from manifest")?;

    let outcome = match cli.command {
        Command::List => list(&manifest, &router),
        Command::Settings { save } => show_settings(&settings, cli.settings.as_deref(), save),
        Command::Call {
            contract,
            path,
            payload,
            headers,
            repeat,
            debounce,
            history,
        } => {
            let declaration = manifest
                .find_contract(&contract)
                .with_context(|| format!("no contract named '{contract}' in manifest"))?;
            let mut call = declaration.prototype();
            if let Some(path) = path {
                call.path = path;
            }
            if let Some(payload) = payload {
                call.payload = serde_json::from_str(&payload).context("parse --payload as JSON")?;
            }
            for header in &headers {
                let (name, value) = header
                    .split_once('=')
                    .with_context(|| format!("header '{header}' must be name=value"))?;
                call.headers.insert(name.trim().to_string(), value.trim().to_string());
            }
            run_calls(&router, call, repeat.max(1), debounce, history).await
        }
    };

    router.shutdown().await;
    outcome
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter() -> EnvFilter {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    EnvFilter::new(directives)
}

fn show_settings(settings: &RouterSettings, settings_path: Option<&Path>, save: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    if save {
        let path = settings_path.map_or_else(default_config_path, Path::to_path_buf);
        save_settings_to_path(settings, &path).with_context(|| format!("save settings to {}", path.display()))?;
        info!(path = %path.display(), "router settings saved");
    }
    Ok(())
}

fn list(manifest: &manifest::Manifest, router: &ContractRouter) -> Result<()> {
    println!("contracts:");
    for registration in router.meta().registrations() {
        let kind = registration.kind().map(|kind| kind.as_str()).unwrap_or("-");
        let provider = registration
            .provider_override
            .map(|id| id.to_string())
            .unwrap_or_else(|| "auto".to_string());
        println!("  {:<24} kind={kind:<16} meta_id={} provider={provider}", registration.method, registration.id);
    }

    println!("providers:");
    let default_id = router.providers().default_id();
    for (id, provider) in router.providers().providers() {
        let marker = if id == default_id { " (default)" } else { "" };
        println!("  {id:<4} {:<16} {}{marker}", provider.name(), provider.state().display());
    }

    if manifest.providers.is_empty() {
        warn!("manifest declares no providers; every call will return an empty result");
    }
    Ok(())
}

async fn run_calls(router: &Arc<ContractRouter>, contract: Contract, repeat: usize, debounce: bool, history: bool) -> Result<()> {
    let mut changes = router.subscribe();

    let results: Vec<ExecutionResult> = if debounce {
        let debouncer = Arc::new(Debouncer::new(Arc::clone(router)));
        let cancel = router.lifetime_token();
        let mut handles = Vec::with_capacity(repeat);
        for _ in 0..repeat {
            let debouncer = Arc::clone(&debouncer);
            let contract = contract.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { debouncer.submit(contract, &cancel).await }));
        }
        let mut results = Vec::with_capacity(repeat);
        for handle in handles {
            results.push(handle.await.context("debounced call task failed")?);
        }
        results
    } else {
        let cancel = CancellationToken::new();
        let mut results = Vec::with_capacity(repeat);
        for _ in 0..repeat {
            results.push(router.execute(contract.clone(), &cancel).await);
        }
        results
    };

    for result in &results {
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    let mut change_events = 0usize;
    loop {
        match tokio::time::timeout(Duration::from_millis(10), changes.recv()).await {
            Ok(Ok(_)) => change_events += 1,
            Ok(Err(RecvError::Lagged(skipped))) => change_events += skipped as usize,
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }
    info!(calls = results.len(), change_events, "calls finished");

    if history {
        println!("{}", serde_json::to_string_pretty(&router.history())?);
    }

    if results.iter().all(|result| !result.success) {
        let error = results
            .last()
            .and_then(|result| result.error.clone())
            .unwrap_or_else(|| "no provider answered".to_string());
        bail!("every call failed: {error}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn rust_log_controls_the_filter() {
        temp_env::with_var("RUST_LOG", Some("debug"), || {
            assert_eq!(env_filter().max_level_hint(), Some(LevelFilter::DEBUG));
        });
        temp_env::with_var_unset("RUST_LOG", || {
            assert_eq!(env_filter().max_level_hint(), Some(LevelFilter::INFO));
        });
    }

    #[test]
    fn init_tracing_honors_rust_log() {
        temp_env::with_var("RUST_LOG", Some("debug"), || {
            init_tracing();
            assert!(tracing::enabled!(tracing::Level::DEBUG));
        });
    }

    #[test]
    fn saved_settings_land_at_the_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("router.json");
        let settings = RouterSettings {
            history_capacity: 5,
            ..RouterSettings::default()
        };
        show_settings(&settings, Some(path.as_path()), true).unwrap();
        assert_eq!(relay_engine::load_settings_from_path(&path).unwrap(), settings);
    }
}
