//! `kiln` - drive generate → test → repair sessions from a specification file
//!
//! ```bash
//! kiln run --spec spec.md --out app.html --report report.json --log session.log
//! kiln compile --spec spec.md --json
//! kiln test --spec spec.md --artifact app.html
//! kiln repair --spec spec.md --artifact app.html
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kiln_core::{KilnConfig, SpecDocument};
use tracing_subscriber::EnvFilter;

mod render;
mod session;

/// Kiln - turn a specification into a tested single-file web app
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (.toml or .json); falls back to KILN_CONFIG and provider env vars
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate, test and repair an artifact from a specification
    Run {
        #[command(flatten)]
        spec: SpecArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List the probes compiled from a specification
    Compile {
        #[command(flatten)]
        spec: SpecArg,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run the probes against an existing artifact
    Test {
        #[command(flatten)]
        spec: SpecArg,

        /// Artifact to test
        #[arg(short, long, value_name = "FILE")]
        artifact: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Start a repair session from an existing artifact, skipping generation
    Repair {
        #[command(flatten)]
        spec: SpecArg,

        /// Artifact to repair
        #[arg(short, long, value_name = "FILE")]
        artifact: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug)]
struct SpecArg {
    /// Specification document (markdown or plain text)
    #[arg(short = 's', long = "spec", value_name = "FILE")]
    path: PathBuf,
}

#[derive(Args, Debug, Default)]
pub(crate) struct OutputArgs {
    /// Where to write the final artifact (default: <short-name>.html)
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Write the last test report as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Write the session log as text
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn load_spec(path: &Path) -> Result<SpecDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading specification {}", path.display()))?;
    Ok(SpecDocument::from_markdown(&text))
}

/// Configuration for sessions that call a model
fn load_config(path: Option<&Path>) -> Result<KilnConfig> {
    let config = match path {
        Some(path) => KilnConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => KilnConfig::from_env().context("loading configuration from the environment")?,
    };
    Ok(config)
}

/// Configuration for offline commands; providers are optional
fn load_offline_config(path: Option<&Path>) -> Result<KilnConfig> {
    match path {
        Some(path) => load_config(Some(path)),
        None => Ok(KilnConfig::from_env().unwrap_or_default()),
    }
}

// Sandbox futures are not Send, so sessions run on the current-thread runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run { spec, output } => {
            let spec = load_spec(&spec.path)?;
            let config = load_config(config_path)?;
            session::run(spec, &config, None, &output).await?;
        }
        Commands::Compile { spec, json } => {
            let spec = load_spec(&spec.path)?;
            let cases = kiln_core::compiler::compile(&spec);
            if json {
                let summaries: Vec<_> = cases.iter().map(|c| c.summary()).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                render::print_descriptors(&spec, &cases);
            }
        }
        Commands::Test { spec, artifact, json } => {
            let spec = load_spec(&spec.path)?;
            let config = load_offline_config(config_path)?;
            let report = session::test(&spec, &config, &artifact).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render::print_report(&report);
            }
            if !report.is_passing() {
                anyhow::bail!("{} probes failed", report.failed_count);
            }
        }
        Commands::Repair { spec, artifact, output } => {
            let spec = load_spec(&spec.path)?;
            let config = load_config(config_path)?;
            let content = std::fs::read_to_string(&artifact)
                .with_context(|| format!("reading artifact {}", artifact.display()))?;
            session::run(spec, &config, Some(content), &output).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "kiln", "run", "--spec", "spec.md", "--out", "app.html", "--report", "r.json", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { spec, output } => {
                assert_eq!(spec.path, PathBuf::from("spec.md"));
                assert_eq!(output.out, Some(PathBuf::from("app.html")));
                assert_eq!(output.report, Some(PathBuf::from("r.json")));
                assert!(output.log.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_repair_requires_artifact() {
        assert!(Cli::try_parse_from(["kiln", "repair", "--spec", "spec.md"]).is_err());
        let cli = Cli::try_parse_from([
            "kiln", "--config", "kiln.toml", "repair", "--spec", "spec.md", "--artifact", "app.html",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("kiln.toml")));
        assert!(matches!(cli.command, Commands::Repair { .. }));
    }

    #[test]
    fn test_load_spec_reads_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.md");
        std::fs::write(&path, "# Todo List\n\n- **FR-001**: Users can add a todo\n").unwrap();

        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.feature_name(), "Todo List");
        assert_eq!(spec.requirements().len(), 1);
    }
}
