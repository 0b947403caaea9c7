mod config;
mod diagnostics;
mod types;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use config::Configuration;
use delegation::{
    credential::{CredentialController, CredentialState, KinitCredentialController},
    matrix::{Endpoint, ExpectationMatrix},
    policy::{LdapPolicyController, PolicyController},
    probe::{AuthMode, HttpProbe, Probe},
    sequencer::{script, SequenceError, Sequencer},
};
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Verifies negotiate authentication and constrained delegation against a live realm")]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<RootCommand>,
}

#[derive(Subcommand)]
enum RootCommand {
    /// Walk the full scenario and compare every outcome with the expectation matrix
    Run(RunArgs),
    Ticket(TicketArgs),
    Delegation(DelegationArgs),
    Probe(ProbeArgs),
    /// Print the expectation matrix as JSON
    Matrix,
}

#[derive(Args)]
struct RunArgs {
    /// Write the recorded steps as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Args)]
#[command(about = "Manage the ticket cache")]
struct TicketArgs {
    #[command(subcommand)]
    command: TicketCommand,
}

#[derive(Subcommand)]
enum TicketCommand {
    Acquire { principal: String },
    Release {},
}

#[derive(Args)]
#[command(about = "Allow or forbid delegation from the front end to the backend")]
struct DelegationArgs {
    #[command(subcommand)]
    command: DelegationCommand,
}

#[derive(Subcommand)]
enum DelegationCommand {
    Set {},
    Unset {},
}

#[derive(Args)]
#[command(about = "Issue a single request against an endpoint")]
struct ProbeArgs {
    endpoint: Endpoint,

    #[arg(long, conflicts_with = "basic")]
    negotiate: bool,

    /// Basic credentials as USER:PASSWORD
    #[arg(long, value_name = "USER:PASSWORD")]
    basic: Option<String>,

    /// Acquire a ticket for this principal first
    #[arg(long = "as", value_name = "PRINCIPAL", requires = "negotiate")]
    principal: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let program = Cli::parse();

    let Some(command) = program.command else {
        eprintln!("No command provided");
        return ExitCode::FAILURE;
    };

    let config = match Configuration::load(program.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", anyhow::Error::new(e));
            return ExitCode::FAILURE;
        }
    };

    let outcome = match command {
        RootCommand::Run(args) => handle_run(&config, args).await,
        RootCommand::Ticket(args) => handle_ticket_commands(&config, args).await.map(|_| true),
        RootCommand::Delegation(args) => handle_delegation_commands(&config, args).await.map(|_| true),
        RootCommand::Probe(args) => handle_probe(&config, args).await.map(|_| true),
        RootCommand::Matrix => print_matrix(&config).map(|_| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn credential_controller(config: &Configuration) -> anyhow::Result<KinitCredentialController> {
    let mut controller = KinitCredentialController::new(&config.realm, &config.ccache);
    if let Some(krb5_config) = &config.krb5_config {
        controller = controller.with_krb5_config(krb5_config);
    }
    if let Some(dir) = controller.ccache().parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create ccache directory {}", dir.display()))?;
    }
    Ok(controller)
}

fn http_probe(config: &Configuration, credentials: &KinitCredentialController) -> anyhow::Result<HttpProbe> {
    let mut probe = HttpProbe::new(&config.base_url, config.probe_timeout(), credentials.ccache_name())
        .context("build http client")?
        .with_curl(&config.curl);
    if let Some(krb5_config) = &config.krb5_config {
        probe = probe.with_krb5_config(krb5_config);
    }
    Ok(probe)
}

/// Returns whether every step passed.
async fn handle_run(config: &Configuration, args: RunArgs) -> anyhow::Result<bool> {
    let credentials = credential_controller(config)?;
    let probe = http_probe(config, &credentials)?;
    let policy = LdapPolicyController::new(config.ldap_settings());

    let sequencer = Sequencer::new(
        credentials,
        policy,
        probe,
        config.principals.clone(),
        &config.front_end,
        &config.back_end,
    );

    let (result, report, aborted) = match sequencer.run().await {
        Ok(result) => {
            let report = types::RunReport::completed(&result);
            (result, report, false)
        }
        Err(SequenceError::Policy { source, completed }) => {
            let reason = format!("{:#}", anyhow::Error::new(source));
            eprintln!("Error: delegation policy mutation failed: {reason}");
            let report = types::RunReport::aborted(&completed, reason);
            (completed, report, true)
        }
    };

    let mut stdout = std::io::stdout().lock();
    diagnostics::summary(&mut stdout, &result)?;

    let passed = !aborted && result.passed();
    if !passed {
        diagnostics::dump(&mut stdout, config, &result)?;
    }
    if let Some(path) = args.report {
        diagnostics::write_report(&path, &report)?;
        tracing::info!(path = %path.display(), "report written");
    }
    Ok(passed)
}

async fn handle_ticket_commands(config: &Configuration, args: TicketArgs) -> anyhow::Result<()> {
    let mut credentials = credential_controller(config)?;

    match args.command {
        TicketCommand::Acquire { principal } => {
            let Some(principal) = config.principals.find(&principal) else {
                bail!("unknown principal {principal}, expected one of the configured scenario principals");
            };
            credentials.acquire(principal).await?;
            println!("{} ({})", credentials.state(), credentials.ccache_name());
        }
        TicketCommand::Release {} => {
            credentials.release().await?;
            println!("{}", credentials.state());
        }
    }
    Ok(())
}

async fn handle_delegation_commands(config: &Configuration, args: DelegationArgs) -> anyhow::Result<()> {
    let mut policy = LdapPolicyController::new(config.ldap_settings());
    let enabled = match args.command {
        DelegationCommand::Set {} => true,
        DelegationCommand::Unset {} => false,
    };

    policy
        .set_delegation(&config.front_end, &config.back_end, enabled)
        .await?;
    println!(
        "{} -> {}: {}",
        config.front_end,
        config.back_end,
        delegation::policy::DelegationPolicy::from(enabled)
    );
    Ok(())
}

async fn handle_probe(config: &Configuration, args: ProbeArgs) -> anyhow::Result<()> {
    let mut credentials = credential_controller(config)?;
    let probe = http_probe(config, &credentials)?;

    let mode = match (args.negotiate, args.basic) {
        (true, _) => AuthMode::Negotiate,
        (false, Some(basic)) => {
            let Some((user, password)) = basic.split_once(':') else {
                bail!("basic credentials must be given as USER:PASSWORD");
            };
            AuthMode::Basic {
                user: user.to_string(),
                password: password.to_string(),
            }
        }
        (false, None) => AuthMode::None,
    };

    if let Some(name) = &args.principal {
        let Some(principal) = config.principals.find(name) else {
            bail!("unknown principal {name}");
        };
        credentials.acquire(principal).await?;
    }

    let state: CredentialState = credentials.state().clone();
    let result = probe.request(args.endpoint, &mode, &state).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if args.principal.is_some() {
        credentials.release().await?;
    }
    Ok(())
}

fn print_matrix(config: &Configuration) -> anyhow::Result<()> {
    let rows: Vec<_> = ExpectationMatrix::rows(&script())
        .into_iter()
        .map(|entry| types::MatrixRow::describe(entry, &config.principals))
        .collect();
    print!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
