//! ramctl
//!
//! Reconciles a role configuration against a local identity state file

use anyhow::Context;
use clap::{Parser, Subcommand};
use ram_reconciler::{ConfigFile, MemoryIdentityService, PolicyDocument, PolicyReference, Reconciler};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ramctl")]
#[command(about = "Provision and tear down identity roles and policies")]
struct Args {
    /// Path to role configuration (.toml or .json)
    #[arg(short = 'c', long, default_value = "ram.toml")]
    config: PathBuf,

    /// Identity state file (created if missing)
    #[arg(short = 's', long, default_value = ".ram-state.json")]
    state: PathBuf,

    /// Account ID used in role ARNs of a new state file
    #[arg(long, default_value = "1000000000000000")]
    account_id: String,

    /// Register a provider-managed policy name before reconciling
    #[arg(long = "system-policy")]
    system_policies: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update the role and its policies, then print the role ARN
    Deploy,
    /// Delete the owned policies and the role
    Destroy,
    /// Print the trust document and policy references without remote calls
    Render,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ConfigFile::load(&args.config)
        .with_context(|| format!("failed to load {:?}", args.config))?;
    config.settings.apply_env()?;
    info!("Loaded configuration for role {}", config.role.name);

    if let Command::Render = args.command {
        config.role.validate()?;
        let trust = config.role.trust_document()?;
        let policies: Vec<serde_json::Value> = config
            .role
            .policies
            .iter()
            .map(|reference| match reference {
                PolicyReference::ByName(name) => serde_json::json!({ "name": name }),
                PolicyReference::Defined { name, statement, .. } => serde_json::json!({
                    "name": name,
                    "document": PolicyDocument::new(statement.clone()),
                }),
            })
            .collect();
        let rendered = serde_json::json!({
            "role": config.role.name,
            "trust": trust,
            "policies": policies,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    let service = MemoryIdentityService::open(&args.state, args.account_id.clone())
        .with_context(|| format!("failed to open state {:?}", args.state))?;
    for name in &args.system_policies {
        service.add_system_policy(name, &PolicyDocument::new(Vec::new()))?;
    }

    let reconciler = Reconciler::new(service, config.settings.retry_policy());
    let outcome = match args.command {
        Command::Deploy => reconciler.deploy(&config.role).await.map(|arn| {
            println!("{}", arn);
        }),
        Command::Destroy => reconciler.destroy(&config.role).await.map(|()| {
            println!("Role {} removed", config.role.name);
        }),
        Command::Render => Ok(()),
    };

    // Partial progress is kept so a later run can resume
    reconciler
        .client()
        .save(&args.state)
        .with_context(|| format!("failed to write state {:?}", args.state))?;

    outcome.with_context(|| format!("{:?} {} failed", args.command, config.role.name))
}
