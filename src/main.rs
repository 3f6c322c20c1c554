use anyhow::Context;
use clap::{Parser, Subcommand};
use contract_sync::contract::load_contract;
use contract_sync::events::{EventSink, SyncEvent, TracingSink};
use contract_sync::healing::{FailureClassifier, FailureRecord};
use contract_sync::{Config, SyncOutcome, Synchronizer, UnitsFileGenerator};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "contract-sync")]
#[command(version)]
#[command(about = "Keep generated API tests in step with an evolving contract")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a contract differs from its last snapshot
    Diff {
        /// Contract id (names the snapshot and artifact directory)
        #[arg(long)]
        id: String,
        /// OpenAPI 3 or Swagger 2 document (JSON or YAML)
        contract: PathBuf,
    },
    /// Regenerate tests for changed operations and store a new artifact
    Sync {
        #[arg(long)]
        id: String,
        /// JSON file mapping operation ids to generated units
        #[arg(long)]
        units: PathBuf,
        contract: PathBuf,
    },
    /// Classify failed tests into proposed fixes
    Heal {
        /// JSON array of {"test_name", "raw_message"} records
        failures: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().or_else(Config::default_config_path);
    tracing::debug!(
        "Config path: {}",
        config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, using defaults)".to_string())
    );
    tracing::debug!("Data directory: {}", config.data_dir().display());

    match cli.command {
        Commands::Diff { id, contract } => {
            let document = load(&contract)?;
            let diff = Synchronizer::from_config(&config).diff(&id, &document)?;

            println!("{}", diff.summary());
            for (sign, set) in [("+", &diff.new), ("~", &diff.modified), ("-", &diff.removed)] {
                for operation in set {
                    println!("{} {}", sign, operation);
                }
            }
        }
        Commands::Sync {
            id,
            units,
            contract,
        } => {
            let document = load(&contract)?;
            let generator = UnitsFileGenerator::load(&units)?;
            let mut synchronizer = Synchronizer::from_config(&config);

            match synchronizer.run(&id, document, &generator)? {
                SyncOutcome::Skipped { .. } => println!("{}: no changes, artifact left as is", id),
                SyncOutcome::Synced {
                    version,
                    path,
                    report,
                    diff,
                } => {
                    println!("{}: {}", id, diff.summary());
                    println!(
                        "wrote v{} to {} ({} preserved, {} regenerated, {} total)",
                        version,
                        path.display(),
                        report.preserved,
                        report.regenerated,
                        report.total
                    );
                }
            }
        }
        Commands::Heal { failures } => {
            let contents = std::fs::read_to_string(&failures)
                .with_context(|| format!("Failed to read failures from {:?}", failures))?;
            let records: Vec<FailureRecord> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse failures from {:?}", failures))?;

            let classifier = FailureClassifier::from_config(&config.healing, config.merge.syntax);
            let (decisions, summary) = classifier.classify_batch(&records);

            let mut sink = TracingSink;
            for decision in &decisions {
                sink.emit(&SyncEvent::healing_decided(decision));
            }

            let output = serde_json::json!({
                "decisions": decisions,
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn load(path: &Path) -> anyhow::Result<contract_sync::contract::ContractDocument> {
    load_contract(path).with_context(|| format!("Failed to load contract from {:?}", path))
}
