// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! `dmzero`: process entrypoint for both roles (§6 "Process inputs").
//! `dmzero controller run` boots C3-C5 and the Controller REST API;
//! `dmzero agent run` boots C6 against a one-time enrollment token.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use dmzero_agent::{AgentApp, AgentAppConfig, AgentConfig};
use dmzero_controller::config::ControllerConfig;
use dmzero_controller::{ControllerApp, ControllerAppConfig};
use dmzero_core::CoreError;
use dmzero_gateways::overlay::{OverlayDirectory, TcpOverlayGateway};
use dmzero_gateways::runtime::BollardRuntimeGateway;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dmzero")]
#[command(about = "Distributed module-orchestration fabric over a zero-trust overlay")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// C3-C5: controller registry, enrollment coordinator, propagation engine.
    Controller {
        #[command(subcommand)]
        command: ControllerCommand,
    },
    /// C6: agent runtime.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
}

#[derive(Subcommand)]
enum ControllerCommand {
    /// Run the controller until interrupted.
    Run,
}

#[derive(Subcommand)]
enum AgentCommand {
    /// Enroll onto the overlay and run until interrupted.
    Run {
        /// One-time enrollment token (§4.6 boot step 1).
        #[arg(long, env = "DMZERO_AGENT_JWT")]
        jwt: String,
        /// Key algorithm requested during enrollment.
        #[arg(long, env = "DMZERO_AGENT_KEY_ALG", default_value = "RSA")]
        key_alg: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    tracing::info!(build = env!("BUILD_GIT_HASH"), "dmzero starting");

    let cli = Cli::parse();
    match cli.role {
        Role::Controller { command: ControllerCommand::Run } => run_controller().await,
        Role::Agent { command: AgentCommand::Run { jwt, key_alg } } => run_agent(jwt, key_alg).await,
    }
}

/// The reference overlay gateway's directory (§9 duck-typed interface
/// wrapper note) lives in process memory, so a controller and its agents
/// sharing one mesh must currently run in the same process — a real
/// zero-trust mesh provider implementing the same trait removes this
/// restriction without touching either boot path below.
async fn run_controller() -> Result<(), CoreError> {
    let process = ControllerConfig::from_env()?;
    let directory = OverlayDirectory::new();
    let overlay = Arc::new(TcpOverlayGateway::new(directory, "0.0.0.0"));

    let app = ControllerApp::setup(ControllerAppConfig { process, overlay });
    run_until_interrupted(app.run(), || app.stop()).await?;
    app.clean();
    Ok(())
}

async fn run_agent(jwt: String, key_alg: String) -> Result<(), CoreError> {
    let config = AgentConfig::new(jwt, key_alg);
    let directory = OverlayDirectory::new();
    let overlay = Arc::new(TcpOverlayGateway::new(directory, "0.0.0.0"));
    let runtime = Arc::new(BollardRuntimeGateway::connect_with_defaults()?);

    let app = AgentApp::setup(AgentAppConfig { config, overlay, runtime })?;
    run_until_interrupted(app.run(), || app.stop()).await?;
    app.clean();
    Ok(())
}

/// Races `run` against Ctrl-C, calling `stop` once either resolves, mirroring
/// the Setup → Run → Stop → Clean lifecycle both app objects expose.
async fn run_until_interrupted<R, S>(run: R, stop: impl FnOnce() -> S) -> Result<(), CoreError>
where
    R: std::future::Future<Output = Result<(), CoreError>>,
    S: std::future::Future<Output = ()>,
{
    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            stop().await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_run_parses() {
        let cli = Cli::try_parse_from(["dmzero", "controller", "run"]).unwrap();
        assert!(matches!(cli.role, Role::Controller { command: ControllerCommand::Run }));
    }

    #[test]
    fn agent_run_parses_jwt_and_defaults_key_alg() {
        let cli = Cli::try_parse_from(["dmzero", "agent", "run", "--jwt", "token"]).unwrap();
        match cli.role {
            Role::Agent { command: AgentCommand::Run { jwt, key_alg } } => {
                assert_eq!(jwt, "token");
                assert_eq!(key_alg, "RSA");
            }
            _ => panic!("expected Role::Agent"),
        }
    }

    #[test]
    fn agent_run_without_jwt_is_rejected() {
        assert!(Cli::try_parse_from(["dmzero", "agent", "run"]).is_err());
    }
}
