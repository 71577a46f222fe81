//! CLI command definitions using clap.
//!
//! - run: execute a run over a contract/invoice pair
//! - status: show a run and its stage results
//! - artefact: print one artefact of a run
//! - runs: list known runs

use clap::{Parser, Subcommand};
use contract_agent::domain::ArtefactRole;
use std::path::PathBuf;

/// contract-agent - compare a contract with its invoice and brief the risks
#[derive(Parser, Debug)]
#[command(name = "contract-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full workflow and wait for it to finish
    Run {
        /// Extracted contract record (.yaml, .yml or .json)
        #[arg(long)]
        contract: PathBuf,

        /// Extracted invoice record (.yaml, .yml or .json)
        #[arg(long)]
        invoice: PathBuf,

        /// Target language for the translated brief (defaults to config)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Show status and stage results of a run
    Status {
        /// Run ID to check
        run_id: String,
    },

    /// Print an artefact of a run
    Artefact {
        /// Run ID
        run_id: String,

        /// Artefact role (e.g. clean-yaml, comparison, risk-brief, translation)
        role: ArtefactRole,
    },

    /// List known runs
    Runs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["contract-agent"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["contract-agent", "runs", "-v", "-c", "/etc/agent.yml"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/agent.yml")));
        assert!(matches!(cli.command, Commands::Runs));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::try_parse_from([
            "contract-agent",
            "run",
            "--contract",
            "c.yaml",
            "--invoice",
            "i.json",
            "--language",
            "fr",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                contract,
                invoice,
                language,
            } => {
                assert_eq!(contract, PathBuf::from("c.yaml"));
                assert_eq!(invoice, PathBuf::from("i.json"));
                assert_eq!(language.as_deref(), Some("fr"));
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_requires_both_documents() {
        assert!(Cli::try_parse_from(["contract-agent", "run", "--contract", "c.yaml"]).is_err());
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::try_parse_from(["contract-agent", "status", "1700000000000-0a1b2c3d"]).unwrap();
        match cli.command {
            Commands::Status { run_id } => assert_eq!(run_id, "1700000000000-0a1b2c3d"),
            _ => panic!("Expected status command"),
        }
    }

    #[test]
    fn test_artefact_command_parses_role() {
        let cli = Cli::try_parse_from(["contract-agent", "artefact", "r1", "risk-brief"]).unwrap();
        match cli.command {
            Commands::Artefact { run_id, role } => {
                assert_eq!(run_id, "r1");
                assert_eq!(role, ArtefactRole::RiskBrief);
            }
            _ => panic!("Expected artefact command"),
        }
    }

    #[test]
    fn test_artefact_command_rejects_unknown_role() {
        assert!(Cli::try_parse_from(["contract-agent", "artefact", "r1", "summary"]).is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
