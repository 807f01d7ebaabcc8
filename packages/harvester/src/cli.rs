//! Command-line interface for the harvester.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{HarvestError, Result};
use crate::harvester::{CswHarvester, HarvestOrchestrator, HarvestOutcome, Harvester};
use crate::index::BulkFileIndex;
use crate::progress::{HarvestEvent, ProgressReporter};
use crate::settings::HarvestSettings;
use crate::storage::LocalStore;

/// geoharvest - Harvest ISO 19139 metadata from CSW catalogues.
#[derive(Parser)]
#[command(name = "geoharvest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one harvest job.
    Harvest {
        /// Job settings (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Store directory (default: in memory, nothing is kept)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for index bulk files
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Harvest everything even when the job is incremental
        #[arg(long)]
        full: bool,
    },
    /// Validate a job and count the records it would harvest.
    Check {
        /// Job settings (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Run the CLI.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Harvest {
            config,
            output,
            index,
            full,
        } => harvest_command(&config, output.as_deref(), index, full).await,
        Commands::Check { config } => check_command(&config).await,
    }
}

fn load_settings(path: &Path) -> Result<HarvestSettings> {
    let settings = HarvestSettings::load(path)?;
    settings.validate()?;
    Ok(settings)
}

/// Execute the harvest command.
async fn harvest_command(
    config: &Path,
    output: Option<&Path>,
    index: Option<PathBuf>,
    full: bool,
) -> Result<()> {
    let settings = load_settings(config)?;

    let store = match output {
        Some(dir) => LocalStore::open(dir).await?,
        None => LocalStore::new(),
    }
    .with_bulk_size(settings.bulk_size);

    println!(
        "{} {} from {}",
        style("Harvesting").bold(),
        style(&settings.source_id).cyan(),
        style(&settings.source_url).green()
    );
    println!();

    let mut orchestrator = HarvestOrchestrator::for_csw(settings, Arc::new(store))?
        .with_reporter(Arc::new(BarReporter::new()))
        .with_force_full(full);
    if let Some(dir) = index {
        tokio::fs::create_dir_all(&dir).await?;
        orchestrator = orchestrator.with_index(Arc::new(BulkFileIndex::new(dir)));
    }

    let outcome = orchestrator.run().await;
    print_outcome(&outcome);

    if outcome.success {
        Ok(())
    } else {
        Err(HarvestError::RunFailed(
            outcome.message.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

fn print_outcome(outcome: &HarvestOutcome) {
    let summary = &outcome.summary;
    let mode = if summary.incremental {
        "incremental"
    } else {
        "full"
    };

    println!("  Mode: {mode}");
    println!("  Records: {}", style(summary.num_docs).green());
    println!("  Skipped: {}", summary.skipped_docs);
    println!("  Couplings: {}", summary.couplings);
    if summary.deleted > 0 {
        println!("  Deleted: {}", summary.deleted);
    }
    if let Some(percentage) = summary.non_fetched_percentage {
        println!("  Not fetched: {percentage:.1}%");
    }
    if let Some(publish) = &summary.publish {
        println!(
            "  Published: {} inserted, {} updated, {} deleted, {} failed",
            publish.inserted, publish.updated, publish.deleted, publish.failed
        );
    }
    if !summary.warnings.is_empty() {
        println!("  Warnings: {}", style(summary.warnings.len()).yellow().bold());
    }
    for error in summary.app_errors.iter().chain(&summary.database_errors) {
        println!("  {} {error}", style("error:").red().bold());
    }

    println!();
    if outcome.success {
        println!("{}", style("Committed").green().bold());
    } else {
        println!("{}", style("Rolled back").red().bold());
    }
}

/// Execute the check command.
async fn check_command(config: &Path) -> Result<()> {
    let settings = load_settings(config)?;
    let harvester = CswHarvester::new(&settings)?;
    let total = harvester.count(settings.record_filter.as_deref()).await?;

    println!(
        "{} {} matching records at {}",
        style("OK").green().bold(),
        style(total).cyan(),
        settings.source_url
    );
    Ok(())
}

/// Shows page progress as a bar.
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30}] {pos}/{len} pages")
                .expect("valid template")
                .progress_chars("=> "),
        );
        bar.set_message("records");
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn report(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Counted { pages, .. } => self.bar.inc_length(pages as u64),
            HarvestEvent::PageCompleted { .. } => self.bar.inc(1),
            HarvestEvent::Phase { name } => self.bar.set_message(name),
            HarvestEvent::Completed { .. } => self.bar.finish_and_clear(),
            HarvestEvent::Started { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_harvest() {
        let cli = Cli::parse_from(["geoharvest", "harvest", "--config", "job.yaml"]);

        let Commands::Harvest {
            config,
            output,
            index,
            full,
        } = cli.command
        else {
            panic!("expected harvest command");
        };
        assert_eq!(config, PathBuf::from("job.yaml"));
        assert!(output.is_none());
        assert!(index.is_none());
        assert!(!full);
    }

    #[test]
    fn test_cli_parse_harvest_with_options() {
        let cli = Cli::parse_from([
            "geoharvest",
            "harvest",
            "-c",
            "job.yaml",
            "--output",
            "store",
            "--index",
            "bulk",
            "--full",
        ]);

        let Commands::Harvest {
            output, index, full, ..
        } = cli.command
        else {
            panic!("expected harvest command");
        };
        assert_eq!(output, Some(PathBuf::from("store")));
        assert_eq!(index, Some(PathBuf::from("bulk")));
        assert!(full);
    }

    #[test]
    fn test_cli_parse_check() {
        let cli = Cli::parse_from(["geoharvest", "check", "--config", "job.yaml"]);
        assert!(matches!(cli.command, Commands::Check { .. }));
    }
}
