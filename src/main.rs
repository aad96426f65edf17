//! Stratum CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use stratum_deploy::adapters::AdapterRegistry;
use stratum_deploy::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use stratum_deploy::cloud::{ControlPlane, HttpControlPlane, MemoryControlPlane};
use stratum_deploy::config::{ConfigParser, ConfigValidator, DeployConfig, StateBackend, find_config_file};
use stratum_deploy::error::{ConfigError, Result, StateError, StratumError};
use stratum_deploy::orchestrator::Orchestrator;
use stratum_deploy::state::{LocalStateStore, S3StateStore, STATE_DIR, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_path = cli.config.as_ref();
    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, formatter),
        Commands::Plan => cmd_plan(config_path, formatter).await,
        Commands::Apply {
            yes,
            sequential,
            deadline_secs,
        } => cmd_apply(config_path, yes, sequential, deadline_secs, formatter).await,
        Commands::Remove { yes } => cmd_remove(config_path, yes, formatter).await,
        Commands::Outputs => cmd_outputs(config_path, formatter).await,
        Commands::State { command } => cmd_state(config_path, command, formatter).await,
    }
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())?;
    Ok(())
}

/// Asks for confirmation on stderr; true when the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing Stratum deployment in: {}", path.display());

    let config_path = path.join("stratum.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/stratum.deploy.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let ignored = [".env".to_string(), format!("{STATE_DIR}/")];
    let existing = if gitignore_path.exists() {
        std::fs::read_to_string(&gitignore_path)?
    } else {
        String::new()
    };
    let missing: Vec<&String> = ignored
        .iter()
        .filter(|entry| !existing.lines().any(|line| line.trim() == entry.as_str()))
        .collect();
    if !missing.is_empty() {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&gitignore_path)?;
        if !existing.is_empty() {
            writeln!(file, "\n# Stratum")?;
        }
        for entry in missing {
            writeln!(file, "{entry}")?;
        }
        eprintln!("Updated: {}", gitignore_path.display());
    }

    let code_dir = path.join("code");
    if !code_dir.exists() {
        std::fs::create_dir_all(&code_dir)?;
        eprintln!("Created: {}", code_dir.display());
    }

    eprintln!("\nDeployment initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your token");
    eprintln!("  2. Put your function code in ./code and edit stratum.deploy.yaml");
    eprintln!("  3. Run 'stratum validate' to check your configuration");
    eprintln!("  4. Run 'stratum plan' to see what will be provisioned");
    eprintln!("  5. Run 'stratum apply' to provision the stack");

    Ok(())
}

fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&result, show_warnings))?;

    if let Some(first) = result.errors.first() {
        return Err(StratumError::Config(ConfigError::validation(
            first.message.clone(),
            first.field.clone(),
        )));
    }
    Ok(())
}

async fn cmd_plan(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, orchestrator) = load_orchestrator(config_path).await?;
    let plan = orchestrator.plan(&config).await?;
    emit(&formatter.format_plan(&plan))
}

async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    sequential: bool,
    deadline_secs: u64,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, orchestrator) = load_orchestrator(config_path).await?;
    let orchestrator = orchestrator
        .with_sequential(sequential)
        .with_deadline(Duration::from_secs(deadline_secs));

    let plan = orchestrator.plan(&config).await?;
    if !auto_approve {
        eprintln!("{}", OutputFormatter::new(OutputFormat::Text).format_plan(&plan));
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let report = orchestrator.apply(&config).await?;
    emit(&formatter.format_apply(&report))
}

async fn cmd_remove(config_path: Option<&PathBuf>, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, orchestrator) = load_orchestrator(config_path).await?;

    let state = orchestrator.store().load(&config.name).await?;
    if state.is_empty() {
        emit(&formatter.success(&format!("Nothing recorded for '{}'.", config.name)))?;
        return Ok(());
    }

    if !auto_approve {
        eprintln!("The following resources will be removed:");
        for instance in state.ordered_instances().iter().rev() {
            eprintln!("  - {} {} ({})", instance.resource_type, instance.name, instance.resource_name);
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'remove' to confirm: ", "remove")? {
            eprintln!("Removal cancelled.");
            return Ok(());
        }
    }

    let report = orchestrator.remove(&config.name).await?;
    emit(&formatter.format_remove(&report))
}

async fn cmd_outputs(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, orchestrator) = load_orchestrator(config_path).await?;
    match orchestrator.outputs(&config.name).await? {
        Some(outputs) => emit(&formatter.format_outputs(&outputs)),
        None => emit(&formatter.warning(&format!("'{}' has not been applied.", config.name))),
    }
}

async fn cmd_state(config_path: Option<&PathBuf>, command: StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let store = build_state_store(&config, &config_file).await?;
    let deployment = config.name.as_str();

    match command {
        StateCommands::Show => {
            let state = store.load(deployment).await?;
            emit(&formatter.format_state(&state))?;
            if let Some(lock) = store.get_lock_info(deployment).await?
                && !lock.is_expired()
            {
                emit(&formatter.format_lock(&lock))?;
            }
        }
        StateCommands::Lock { holder } => {
            let lock = store
                .acquire_lock(deployment, holder.as_deref().unwrap_or(""), "manual")
                .await?;
            emit(&formatter.format_lock(&lock))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock(deployment).await?;
                emit(&formatter.success("State forcefully unlocked."))?;
            } else if let Some(id) = lock_id {
                store.release_lock(deployment, &id).await?;
                if store.is_locked(deployment).await? {
                    emit(&formatter.warning("Lock id did not match; the state is still locked."))?;
                } else {
                    emit(&formatter.success("State unlocked."))?;
                }
            } else {
                return Err(StratumError::State(StateError::LockFailed {
                    message: String::from("provide --lock-id or use --force"),
                }));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads and validates the configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<(DeployConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok((config, config_file))
}

/// Creates the state store the configuration selects.
async fn build_state_store(config: &DeployConfig, config_file: &Path) -> Result<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let base = config_file.parent().unwrap_or_else(|| Path::new("."));
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StratumError::State(StateError::s3("S3 bucket not configured")))?;
            Box::new(S3StateStore::new(bucket, config.state.prefix.as_deref(), config.state.region.as_deref()).await?)
        }
    };
    debug!("Using {} state backend", store.backend_type());
    Ok(store)
}

/// Creates the control plane the configuration selects.
fn build_control_plane(config: &DeployConfig) -> Result<Arc<dyn ControlPlane>> {
    match &config.control_plane.endpoint {
        Some(endpoint) => {
            let token = ConfigParser::api_token();
            if token.is_none() {
                warn!("No API token set; control plane requests are unauthenticated");
            }
            Ok(Arc::new(HttpControlPlane::with_timeout(
                endpoint,
                token,
                config.control_plane.timeout_secs,
            )?))
        }
        None => {
            warn!("No control plane endpoint configured; using the in-memory control plane");
            Ok(Arc::new(MemoryControlPlane::default()))
        }
    }
}

/// Loads the configuration and wires an orchestrator for it.
async fn load_orchestrator(
    config_path: Option<&PathBuf>,
) -> Result<(DeployConfig, Orchestrator<Box<dyn StateStore>>)> {
    let (config, config_file) = load_config(config_path)?;
    let store = build_state_store(&config, &config_file).await?;
    let plane = build_control_plane(&config)?;

    let account = if config.topic.is_some() {
        None
    } else {
        let identity = plane.caller_identity().await?;
        debug!("Caller account: {}", identity.account);
        Some(identity.account)
    };

    let orchestrator = Orchestrator::new(store, AdapterRegistry::with_control_plane(&plane)).with_account(account);
    Ok((config, orchestrator))
}
