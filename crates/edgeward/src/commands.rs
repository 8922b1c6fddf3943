//! Subcommand handlers.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use edgeward_api::WebSocketConnector;
use edgeward_config::Config;
use edgeward_core::{Agent, DesiredState, Mode, Reconciler, convert, provider};

use crate::cli::{OutputFormat, PlanArgs};
use crate::error::AgentError;

// ── run ──────────────────────────────────────────────────────────────

pub async fn run(config: &Config) -> Result<(), AgentError> {
    let agent_config = config.to_agent_config()?;
    let provider = provider::build(&agent_config.provider)?;
    let connector = Arc::new(WebSocketConnector::new(agent_config.endpoint.clone()));

    info!(
        device_id = %agent_config.device_id,
        mode = %agent_config.initial_mode,
        provider = provider.name(),
        endpoint = %agent_config.endpoint,
        "starting agent"
    );

    let agent = Agent::new(agent_config, provider, connector);
    let cancel = CancellationToken::new();
    let signals = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    let result = agent.run(cancel).await;
    signals.abort();
    info!("agent stopped");
    result.map_err(AgentError::from)
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}

// ── check-config ─────────────────────────────────────────────────────

pub fn check_config(config: &Config) -> Result<(), AgentError> {
    let agent = config.to_agent_config()?;
    let summary = config.summary()?;

    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{summary}")?;
    writeln!(
        stdout,
        "\n# configuration OK: device {} starts in {} mode with the {} provider",
        agent.device_id,
        agent.initial_mode,
        agent.provider.kind()
    )?;
    Ok(())
}

// ── plan ─────────────────────────────────────────────────────────────

pub async fn plan(config: &Config, args: &PlanArgs) -> Result<(), AgentError> {
    let desired = read_desired(&args.file)?;
    let provider = provider::build(&config.provider_settings()?)?;
    let reconciler = Reconciler::new(provider, config.provider_timeout()?, config.retry_policy());

    // Shadow mode never calls an apply_* capability.
    let outcome = reconciler.reconcile(&desired, Mode::Shadow).await;

    let rendered = match args.output {
        OutputFormat::Json => serde_json::to_string_pretty(&outcome)
            .map_err(|e| AgentError::Output(e.to_string()))?,
        OutputFormat::Yaml => {
            serde_yaml::to_string(&outcome).map_err(|e| AgentError::Output(e.to_string()))?
        }
    };
    writeln!(std::io::stdout().lock(), "{}", rendered.trim_end())?;

    if outcome.is_success() {
        return Ok(());
    }
    let failed: Vec<String> = outcome
        .failed_domains()
        .iter()
        .map(ToString::to_string)
        .collect();
    Err(AgentError::Provider {
        operation: "plan".into(),
        reason: format!("could not plan {}", failed.join(", ")),
    })
}

/// Parse a desired-state document. `sequence` is optional and defaults
/// to 0; the rest goes through the same validation as a pushed state.
fn read_desired(path: &Path) -> Result<DesiredState, AgentError> {
    let input_error = |reason: String| AgentError::Input {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| input_error(e.to_string()))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let document: Value = if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| input_error(e.to_string()))?
    } else {
        serde_json::from_str(&text).map_err(|e| input_error(e.to_string()))?
    };
    if !document.is_object() {
        return Err(input_error("expected an object at the top level".into()));
    }

    let sequence = document.get("sequence").and_then(Value::as_u64).unwrap_or(0);
    convert::desired_from_push(sequence, document).map_err(|e| input_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn yaml_and_json_documents_agree() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("desired.json");
        let yaml = dir.path().join("desired.yml");
        std::fs::write(
            &json,
            r#"{"sequence": 4, "routes": [{"destination": "10.8.0.0/16", "gateway": "192.168.1.254"}]}"#,
        )
        .unwrap();
        std::fs::write(
            &yaml,
            "sequence: 4\nroutes:\n  - destination: 10.8.0.0/16\n    gateway: 192.168.1.254\n",
        )
        .unwrap();

        let a = read_desired(&json).unwrap();
        let b = read_desired(&yaml).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.sequence, 4);
        assert_eq!(a.config.routes.len(), 1);
    }

    #[test]
    fn top_level_array_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desired.json");
        std::fs::write(&path, "[]").unwrap();

        let err = read_desired(&path).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit_code::USAGE);
    }
}
