//! Command-line interface for the regime allocator.

use regime_allocator::capability::Capabilities;
use regime_allocator::config::PipelineFileConfig;
use regime_allocator::data::{CsvMarketDataSource, MarketDataSource, SyntheticMarketDataSource};
use regime_allocator::error::{PipelineError, Result};
use regime_allocator::pipeline::{Pipeline, PipelineOptions};
use regime_allocator::regime::cache::FileCacheStore;
use regime_allocator::report::ResultFormatter;
use regime_allocator::risk::SimulationTier;
use regime_allocator::universe::MarketUniverse;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{builder::Builder, settings::Style};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Regime allocator - regime-aware multi-asset allocation and risk.
#[derive(Parser)]
#[command(name = "regime-allocator")]
#[command(version)]
#[command(about = "Factor, regime, allocation, backtest and Monte Carlo risk pipeline")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for a market
    Run {
        /// Market identifier (usa, india, uk)
        #[arg(short, long)]
        market: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Wide price CSV (date column plus one column per ticker)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Volatility index CSV (date, value)
        #[arg(long)]
        volatility: Option<PathBuf>,

        /// Allocation strategy
        #[arg(short = 'S', long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Refit the regime model even when the cache matches
        #[arg(long)]
        refit: bool,

        /// Disable the classifier ensemble
        #[arg(long)]
        no_ensemble: bool,

        /// Do not read or write the regime model cache
        #[arg(long)]
        no_cache: bool,

        /// Use the smaller interactive path count
        #[arg(long)]
        quick: bool,

        /// Random seed for synthetic data
        #[arg(long)]
        seed: Option<u64>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "regime-allocator.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the supported markets
    Markets,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Bucket targets chosen by the detected regime
    Regime,
    MeanVariance,
    MinVariance,
    RiskParity,
    MaxSharpe,
    BlackLitterman,
    /// CVaR minimization
    Cvar,
}

impl StrategyArg {
    fn config_name(&self) -> &'static str {
        match self {
            StrategyArg::Regime => "regime",
            StrategyArg::MeanVariance => "mean_variance",
            StrategyArg::MinVariance => "min_variance",
            StrategyArg::RiskParity => "risk_parity",
            StrategyArg::MaxSharpe => "max_sharpe",
            StrategyArg::BlackLitterman => "black_litterman",
            StrategyArg::Cvar => "cvar",
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            market,
            start,
            end,
            data,
            volatility,
            strategy,
            refit,
            no_ensemble,
            no_cache,
            quick,
            seed,
            config,
        } => {
            let mut file_config = match config {
                Some(path) => PipelineFileConfig::load(path)?,
                None => PipelineFileConfig::default(),
            };
            if let Some(m) = market {
                file_config.pipeline.market = m.clone();
            }
            if let Some(s) = start {
                file_config.pipeline.start = s.format("%Y-%m-%d").to_string();
            }
            if let Some(e) = end {
                file_config.pipeline.end = e.format("%Y-%m-%d").to_string();
            }
            if let Some(s) = strategy {
                file_config.optimizer.strategy = s.config_name().to_string();
            }
            if let Some(s) = seed {
                file_config.pipeline.seed = *s;
            }
            file_config.regime.force_refit |= *refit;
            file_config.regime.ensemble &= !*no_ensemble;

            let mut options = file_config.to_pipeline_options(Capabilities::all())?;
            if *quick {
                options.risk_tier = SimulationTier::Interactive;
            }
            let cache_dir = (!*no_cache).then(|| file_config.pipeline.model_dir.clone());

            match data {
                Some(path) => {
                    let mut source = CsvMarketDataSource::new(path);
                    if let Some(v) = volatility {
                        source = source.with_volatility(v);
                    }
                    let mut pipeline = Pipeline::new(source).with_tracked_file(path);
                    if let Some(v) = volatility {
                        pipeline = pipeline.with_tracked_file(v);
                    }
                    run_pipeline(pipeline, &options, cache_dir, cli.output)
                }
                None => {
                    let universe = MarketUniverse::by_id(&options.market)?;
                    warn!("No data file given, running on synthetic prices");
                    let source = SyntheticMarketDataSource {
                        tickers: universe.default_tickers,
                        seed: options.seed,
                    };
                    run_pipeline(Pipeline::new(source), &options, cache_dir, cli.output)
                }
            }
        }

        Commands::Init { output, force } => init_config(output, *force),

        Commands::Markets => {
            print_markets(cli.output);
            Ok(())
        }
    }
}

fn run_pipeline<S: MarketDataSource>(
    mut pipeline: Pipeline<S>,
    options: &PipelineOptions,
    cache_dir: Option<PathBuf>,
    output: OutputFormat,
) -> Result<()> {
    if let Some(dir) = cache_dir {
        match FileCacheStore::new(&dir) {
            Ok(store) => pipeline = pipeline.with_cache_store(Arc::new(store)),
            Err(e) => warn!("Regime cache disabled: {}", e),
        }
    }

    let result = pipeline.run(options)?;
    info!("Run {} complete", result.metadata.run_id);

    match output {
        OutputFormat::Text => ResultFormatter::print_report(&result),
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&result)?),
    }
    Ok(())
}

fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(PipelineError::ConfigError(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }
    fs::write(output, PipelineFileConfig::example())?;
    println!(
        "{} Wrote example configuration to {}",
        "✓".green(),
        output.display()
    );
    Ok(())
}

fn print_markets(output: OutputFormat) {
    let markets = MarketUniverse::all();
    if output == OutputFormat::Json {
        match serde_json::to_string_pretty(&markets) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize markets: {}", e),
        }
        return;
    }

    let mut builder = Builder::new();
    builder.push_record(["Id", "Name", "Currency", "Volatility", "Default Tickers"]);
    for m in &markets {
        builder.push_record([
            m.id.clone(),
            m.name.clone(),
            m.currency.clone(),
            m.volatility.clone(),
            m.default_tickers.join(", "),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}
