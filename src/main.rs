//! Vault Auth Broker - OIDC logins to short-lived, team-scoped Vault tokens.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use vault_auth_broker::{
    cli::{Cli, Command},
    config::Config,
    keys::KeyManager,
    setup_tracing,
    vault::VaultProvisioner,
    Broker, Error,
};

/// Exit code for fatal runtime errors (bind failure, unrecoverable panic).
const EXIT_RUNTIME: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Setup) => run_setup(&cli).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load config and key material; both are exit-code-1 failures.
fn load_config_and_keys(cli: &Cli) -> Result<(Config, Arc<KeyManager>), ExitCode> {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return Err(ExitCode::FAILURE);
        }
    };

    let keys = match KeyManager::load(&config.keys.signing_key_path) {
        Ok(keys) => Arc::new(keys),
        Err(e) => {
            error!("Failed to load signing key: {e}");
            return Err(ExitCode::FAILURE);
        }
    };

    Ok((config, keys))
}

/// Run the broker server
async fn run_server(cli: &Cli) -> ExitCode {
    let (config, keys) = match load_config_and_keys(cli) {
        Ok(parts) => parts,
        Err(code) => return code,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind,
        idp = %config.idp.issuer_url,
        "Starting Vault auth broker"
    );

    let broker = Arc::new(Broker::new(config, keys));

    match vault_auth_broker::broker::run(broker).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ Error::Config(_)) => {
            error!("Broker configuration error: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Broker error: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

/// Provision the Vault-side JWT auth and token roles
async fn run_setup(cli: &Cli) -> ExitCode {
    let (config, keys) = match load_config_and_keys(cli) {
        Ok(parts) => parts,
        Err(code) => return code,
    };

    let Some(root_token) = config.vault.root_token.clone() else {
        error!("VAULT_ROOT_TOKEN is required for setup");
        return ExitCode::FAILURE;
    };

    let provisioner = VaultProvisioner::new(config.vault.addr.clone(), root_token);
    match provisioner
        .provision(
            &config.broker.issuer,
            &config.broker.audience,
            keys.public_key_pem(),
            &config.teams,
        )
        .await
    {
        Ok(()) => {
            let mut teams: Vec<&String> = config.teams.teams.keys().collect();
            teams.sort();
            println!("Provisioned Vault at {}", config.vault.addr);
            for team in teams {
                println!("  {team}: jwt role '{team}', token role '{team}-token'");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Vault provisioning failed: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}
