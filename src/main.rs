//! sample-parity CLI
//!
//! Lists and runs the sample equivalence cases. Exit status is 0 when every
//! selected case passed, 1 when any failed and 2 on usage or configuration
//! errors.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use sample_parity::logging::init_logging;
use sample_parity::{
    CaseSelector, Catalog, CatalogProvider, ComparisonMode, EquivalenceHarness, Fixtures,
    HarnessConfig, LogLevel, Normalization,
};

/// Cross-implementation output parity for inference samples
#[derive(Parser)]
#[command(name = "sample-parity", version)]
struct Cli {
    /// Configuration file with a [harness] table
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the selected cases
    List(ListArgs),
    /// Run the selected cases
    Run(RunArgs),
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Args)]
struct Selection {
    /// Case table to use instead of the built-in one
    #[arg(long, value_name = "PATH")]
    cases: Option<PathBuf>,

    /// Only cases whose id contains this substring
    #[arg(long)]
    filter: Option<String>,

    /// Only cases carrying this tag (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
}

#[derive(Args)]
struct ListArgs {
    #[command(flatten)]
    selection: Selection,

    /// Dump the case table as TOML instead
    #[arg(long)]
    toml: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    selection: Selection,

    /// Run the variants of a case concurrently
    #[arg(long)]
    parallel: bool,

    /// Keep running variants after one fails
    #[arg(long)]
    no_fail_fast: bool,

    /// Per-variant timeout in seconds (0 = unbounded)
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    #[arg(long, value_enum, value_name = "MODE")]
    normalize: Option<Normalization>,

    #[arg(long, value_enum, value_name = "MODE")]
    compare: Option<ComparisonMode>,

    /// Run the first variant twice and require identical output
    #[arg(long)]
    check_determinism: bool,

    /// Never download artifacts
    #[arg(long)]
    offline: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write a JSON receipt to this path
    #[arg(long, value_name = "PATH")]
    receipt: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let config =
        HarnessConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.log_level.unwrap_or(config.log_level));

    match cli.command {
        Commands::List(args) => list(&args, &config).map(|()| 0),
        Commands::Run(args) => run(args, config).await,
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::from_toml(path)
            .with_context(|| format!("Failed to load case table {}", path.display())),
        None => Ok(Catalog::builtin()),
    }
}

fn selector(selection: &Selection) -> CaseSelector {
    CaseSelector { filter: selection.filter.clone(), tags: selection.tags.clone() }
}

fn list(args: &ListArgs, config: &HarnessConfig) -> Result<()> {
    let catalog = load_catalog(args.selection.cases.as_deref())?;
    if args.toml {
        print!("{}", catalog.to_toml()?);
        return Ok(());
    }

    let cases = selector(&args.selection).select(catalog.build_cases(&config.samples)?);
    for case in &cases {
        println!(
            "{:<48} {:<12} [{}] {:?}",
            case.id,
            case.kind.to_string(),
            case.variant_names().join(", "),
            case.args
        );
    }
    println!("{} case(s)", cases.len());
    Ok(())
}

async fn run(args: RunArgs, mut config: HarnessConfig) -> Result<u8> {
    config.parallel |= args.parallel;
    config.fail_fast &= !args.no_fail_fast;
    config.check_determinism |= args.check_determinism;
    config.offline |= args.offline;
    if let Some(secs) = args.timeout_secs {
        config.timeout_secs = secs;
    }
    if let Some(mode) = args.normalize {
        config.normalization = mode;
    }
    if let Some(mode) = args.compare {
        config.comparison = mode;
    }

    let catalog = load_catalog(args.selection.cases.as_deref())?;
    let cases = selector(&args.selection).select(catalog.build_cases(&config.samples)?);
    if cases.is_empty() {
        bail!("no cases matched the selection");
    }

    let provider = CatalogProvider::new(catalog, &config)?;
    let mut fixtures = Fixtures::new(Arc::new(provider));
    if config.cleanup_cache {
        fixtures = fixtures.with_cleanup(config.cache_dir.clone());
    }

    info!("Fixture cache: {}", config.cache_dir.display());
    let harness = EquivalenceHarness::with_process_runner(config, Arc::new(fixtures));
    let report = harness.run_session(&cases).await;

    match args.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    let written = match &args.receipt {
        Some(path) => report.write_receipt(path),
        None => Ok(()),
    };
    if let Err(e) = harness.fixtures().teardown().await {
        warn!("Failed to tear down fixtures: {e}");
    }
    written?;

    Ok(report.exit_code())
}
