#![forbid(unsafe_code)]

//! `cluster-session`: companion CLI for the session factory.
//!
//! Manages keychain credentials, prints data-client ids for dependency
//! files, and runs a debug-mode session establishment end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use cluster_session::broker::InProcessBrokerFactory;
use cluster_session::credential::{FixedProbe, KeyringNegotiator};
use cluster_session::files::{data_client_id, InMemoryFileStore};
use cluster_session::models::credential::{CredType, Credential};
use cluster_session::models::start_info::StartInfo;
use cluster_session::{FactoryConfig, Result, SessionError, SessionFactory};

const PASSWORD_ENV: &str = "CLUSTER_SESSION_PASSWORD";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cluster-session", about = "Cluster session client tools", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage credentials stored in the OS keychain.
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
    /// Print the data-client id each file would be uploaded under.
    Hash {
        /// Account that owns the uploads; defaults to the current user.
        #[arg(long)]
        owner: Option<String>,
        /// Files to hash.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Establish a debug-mode session in process and print its descriptor.
    DryRun {
        /// Service name; overrides `[session] service_name`.
        #[arg(long)]
        service: Option<String>,
        /// Request a durable session.
        #[arg(long)]
        durable: bool,
        /// Establishment timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
enum CredentialAction {
    /// Store a username/password (or token) for a head node.
    Save {
        /// Head node the credential belongs to.
        #[arg(long)]
        head_node: String,
        /// Account name.
        #[arg(long)]
        username: Option<String>,
        /// Password; read from `CLUSTER_SESSION_PASSWORD` when omitted.
        #[arg(long)]
        password: Option<String>,
        /// Cloud bearer token instead of a password.
        #[arg(long, conflicts_with = "password")]
        token: Option<String>,
    },
    /// Remove the stored credential for a head node.
    Purge {
        /// Head node whose credential is removed.
        #[arg(long)]
        head_node: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| SessionError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => FactoryConfig::load_from_path(path)?,
        None => FactoryConfig::default(),
    };

    match args.command {
        Command::Credential { action } => manage_credential(action).await,
        Command::Hash { owner, files } => hash_files(owner, &files).await,
        Command::DryRun {
            service,
            durable,
            timeout_secs,
        } => dry_run(config, service, durable, timeout_secs.map(Duration::from_secs)).await,
    }
}

async fn manage_credential(action: CredentialAction) -> Result<()> {
    let negotiator = KeyringNegotiator::new(Arc::new(FixedProbe(CredType::UsernamePassword)));
    match action {
        CredentialAction::Save {
            head_node,
            username,
            password,
            token,
        } => {
            let credential = match token {
                Some(token) => Credential {
                    username,
                    ..Credential::token(token)
                },
                None => {
                    let password = password
                        .or_else(|| std::env::var(PASSWORD_ENV).ok())
                        .ok_or_else(|| {
                            SessionError::InvalidCredential(format!(
                                "pass --password, --token, or set {PASSWORD_ENV}"
                            ))
                        })?;
                    Credential::password(username.unwrap_or_default(), password)
                }
            };
            negotiator.store(&head_node, &credential).await?;
            info!(%head_node, "credential saved");
        }
        CredentialAction::Purge { head_node } => {
            negotiator.remove(&head_node).await?;
            info!(%head_node, "credential purged");
        }
    }
    Ok(())
}

async fn hash_files(owner: Option<String>, files: &[PathBuf]) -> Result<()> {
    let owner = owner.unwrap_or_else(|| StartInfo::new("localhost", "hash").target.owner());
    for path in files {
        let content = tokio::fs::read(path).await.map_err(|err| {
            SessionError::Io(format!("failed to read {}: {err}", path.display()))
        })?;
        println!("{}\t{}", data_client_id(&owner, &content), path.display());
    }
    Ok(())
}

async fn dry_run(
    config: FactoryConfig,
    service: Option<String>,
    durable: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let mut info = config
        .session
        .clone()
        .unwrap_or_else(|| StartInfo::new("localhost", "echo"));
    if let Some(service) = service {
        info.service_name = service;
    }
    info.target.debug_mode = true;

    let negotiator = KeyringNegotiator::new(Arc::new(FixedProbe(CredType::Integrated)));
    let factory = SessionFactory::new(
        config,
        Arc::new(negotiator),
        Arc::new(InProcessBrokerFactory),
        Arc::new(InMemoryFileStore::new()),
    );

    let session = factory.create_session(&info, durable, timeout).await?;
    let summary = serde_json::json!({
        "kind": session.kind(),
        "endpoint": session.endpoint(),
        "session": session.info(),
        "data_client_ids": session.data_client_ids(),
        "report": session.report(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    session.close();
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| SessionError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| SessionError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
