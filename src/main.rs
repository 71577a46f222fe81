use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::Commands;
use contract_agent::config::Config;
use contract_agent::domain::{ArtefactRole, Run, RunStatus, StageStatus};
use contract_agent::extraction::SourceDocument;
use contract_agent::{RunManager, RunOptions};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("contract-agent")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("contract-agent.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let manager = RunManager::from_config(config).context("Failed to initialise run manager")?;

    match &cli.command {
        Commands::Run {
            contract,
            invoice,
            language,
        } => handle_run_command(&manager, contract, invoice, language.clone(), cli.is_verbose()).await,
        Commands::Status { run_id } => handle_status_command(&manager, run_id).await,
        Commands::Artefact { run_id, role } => handle_artefact_command(&manager, run_id, *role),
        Commands::Runs => handle_runs_command(&manager),
    }
}

async fn handle_run_command(
    manager: &RunManager,
    contract: &Path,
    invoice: &Path,
    language: Option<String>,
    verbose: bool,
) -> Result<()> {
    info!("Running workflow: contract={} invoice={}", contract.display(), invoice.display());
    let contract = SourceDocument::from_path(contract)?;
    let invoice = SourceDocument::from_path(invoice)?;

    println!("{} {} / {}", "Running:".cyan(), contract.file_name, invoice.file_name);
    let options = RunOptions {
        target_language: language,
    };
    let run = manager
        .run(Some(contract), Some(invoice), options)
        .await
        .context("Run could not start")?;

    print_run(&run);
    if verbose || run.status == RunStatus::Completed {
        println!();
        println!("{}", "Artefacts:".bold());
        for artefact in manager.list_artefacts(&run.id)? {
            println!("  {:<16} {}", artefact.role.to_string(), artefact.path.display());
        }
    }

    if run.status == RunStatus::Failed {
        eyre::bail!("run {} failed", run.id);
    }
    Ok(())
}

async fn handle_status_command(manager: &RunManager, run_id: &str) -> Result<()> {
    info!("Getting status for run: {}", run_id);
    let run = manager.get_status(run_id).await?;
    print_run(&run);
    Ok(())
}

fn handle_artefact_command(manager: &RunManager, run_id: &str, role: ArtefactRole) -> Result<()> {
    info!("Reading artefact {} of run {}", role, run_id);
    let payload = manager.get_artefact(run_id, role)?;
    match String::from_utf8(payload) {
        Ok(text) => print!("{}", text),
        Err(e) => println!("{} {} bytes of binary content", "Binary:".yellow(), e.as_bytes().len()),
    }
    Ok(())
}

fn handle_runs_command(manager: &RunManager) -> Result<()> {
    info!("Listing runs");
    let runs = manager.list_runs()?;
    if runs.is_empty() {
        println!("{}", "No runs yet".dimmed());
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {:<10} {}  {} stage(s)",
            run.id,
            colored_status(run.status),
            run.target_language,
            run.stages.len()
        );
    }
    Ok(())
}

fn print_run(run: &Run) {
    println!("{} {}", "Run:".green(), run.id);
    println!("  status:   {}", colored_status(run.status));
    println!("  language: {}", run.target_language);
    for stage in &run.stages {
        let marker = match stage.status {
            StageStatus::Ok => "ok".green(),
            StageStatus::Failed => "failed".red(),
        };
        println!(
            "  {:<12} {:<8} attempts={} {}ms",
            stage.stage,
            marker,
            stage.attempts,
            stage.finished_at - stage.started_at
        );
        if let Some(error) = &stage.error {
            println!("               {}", error.red());
        }
    }
    if let Some(failure) = &run.failure {
        println!(
            "  {} {:?} at {}: {}",
            "failure:".red(),
            failure.reason,
            failure.stage.as_deref().unwrap_or("-"),
            failure.detail
        );
    }
}

fn colored_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().dimmed(),
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::Completed => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the configured level is known
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
