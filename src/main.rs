use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;
use scholar_harvest::config::{find_config_file, load_config, save_config, Config};
use scholar_harvest::enrich::OllamaModel;
use scholar_harvest::models::{Query, RunReport};
use scholar_harvest::pipeline::{
    CancellationToken, FileStateStore, Pipeline, PipelineError, StateStore,
};
use scholar_harvest::sources::SourceRegistry;
use scholar_harvest::utils::HttpClient;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Scholar Harvest - Search, merge, enrich and file academic papers from multiple sources
#[derive(Parser, Debug)]
#[command(name = "scholar-harvest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resilient multi-source literature harvesting with LLM enrichment", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Log format (default: logging.format from the configuration)
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Automatic based on terminal (table if TTY, JSON otherwise)
    Auto,
    /// Table format (human-readable)
    Table,
    /// JSON format (machine-readable)
    Json,
}

/// Log line format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline for a query
    #[command(alias = "r")]
    Run {
        /// Search query string
        query: String,

        /// Maximum number of results per source (default: search.max_results)
        #[arg(long, short)]
        max_results: Option<usize>,

        /// Only query these sources (repeatable; default: all configured)
        #[arg(long, short)]
        source: Vec<String>,

        /// Concurrent enrichment calls (default: enrichment.concurrency)
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,
    },

    /// Continue a checkpointed run
    Resume {
        /// Run identifier
        run_id: String,
    },

    /// Show the checkpointed state of a run
    Status {
        /// Run identifier
        run_id: String,
    },

    /// List checkpointed runs
    Runs,

    /// List configured sources
    Sources,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Destination (default: <config_dir>/scholar-harvest/config.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.logging.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scholar_harvest={}", level)));

    let format = cli.log_format.unwrap_or(if config.logging.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Plain
    });

    // Logs go to stderr so JSON output on stdout stays machine-readable
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Completions need no configuration
    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "scholar-harvest", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli.config.clone().or_else(find_config_file);
    let config = load_config(config_path.as_deref())?;
    init_logging(&cli, &config);
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    let format = resolve_format(cli.output);

    match cli.command {
        Commands::Run {
            query,
            max_results,
            source,
            concurrency,
        } => {
            let mut config = config;
            if let Some(concurrency) = concurrency {
                config.enrichment.concurrency = concurrency;
            }

            let pipeline = Pipeline::from_config(&config)?;
            cancel_on_ctrl_c(pipeline.cancellation_token());
            check_model(&config).await;

            let mut query =
                Query::new(query).max_results(max_results.unwrap_or(config.search.max_results));
            if !source.is_empty() {
                query = query.sources(source);
            }

            finish(pipeline.run(query).await, format)
        }

        Commands::Resume { run_id } => {
            let pipeline = Pipeline::from_config(&config)?;
            cancel_on_ctrl_c(pipeline.cancellation_token());
            finish(pipeline.resume(&run_id).await, format)
        }

        Commands::Status { run_id } => {
            let store = FileStateStore::new(config.state_dir());
            let state = store
                .load(&run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Unknown run '{}'", run_id))?;
            output_report(&state.report(), format)
        }

        Commands::Runs => {
            let store = FileStateStore::new(config.state_dir());
            let mut reports = Vec::new();
            for run_id in store.list().await? {
                if let Some(state) = store.load(&run_id).await? {
                    reports.push(state.report());
                }
            }
            output_runs(&reports, format)
        }

        Commands::Sources => {
            let registry = SourceRegistry::from_config(&config, &HttpClient::direct()?);
            output_sources(&registry, &config, format)
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                let path = match path {
                    Some(path) => path,
                    None => dirs::config_dir()
                        .map(|d| d.join("scholar-harvest").join("config.toml"))
                        .ok_or_else(|| anyhow::anyhow!("No config directory on this platform"))?,
                };
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
                }
                save_config(&Config::default(), &path)?;
                println!("Wrote default configuration to {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },

        Commands::Completions { .. } => Ok(()),
    }
}

/// Cancel the run on the first Ctrl-C; the last checkpoint stays resumable
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current checkpoint");
            token.cancel();
        }
    });
}

/// Warn early when the enrichment model is unreachable; enrichment failures
/// are still isolated per record.
async fn check_model(config: &Config) {
    let model = OllamaModel::new(
        reqwest::Client::new(),
        &config.model.base_url,
        &config.model.name,
    );
    if let Some(reason) = model.ensure_available().await.reason() {
        tracing::warn!("Enrichment model not ready: {}", reason);
    }
}

fn finish(result: Result<RunReport, PipelineError>, format: OutputFormat) -> Result<()> {
    match result {
        Ok(report) => {
            output_report(&report, format)?;
            if let Some(failure) = &report.failure {
                anyhow::bail!("Run {} failed: {}", report.run_id, failure);
            }
            Ok(())
        }
        Err(PipelineError::Cancelled { run_id, stage }) => {
            eprintln!(
                "Run {} stopped after stage '{}'. Continue with: scholar-harvest resume {}",
                run_id, stage, run_id
            );
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}

fn resolve_format(format: OutputFormat) -> OutputFormat {
    if format == OutputFormat::Auto {
        if std::io::stdout().is_terminal() {
            OutputFormat::Table
        } else {
            OutputFormat::Json
        }
    } else {
        format
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max - 3).collect::<String>())
    } else {
        text.to_string()
    }
}

fn output_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    use comfy_table::{Attribute, Cell, Table};

    println!("Run:    {}", report.run_id);
    println!("Query:  {}", report.query);
    println!("Stage:  {}", report.stage.progress());
    if let Some(failure) = &report.failure {
        println!("Failure: {}", failure);
    }

    let mut sources = Table::new();
    sources.load_preset(comfy_table::presets::UTF8_FULL);
    sources.set_header(vec!["Source", "Status", "Candidates", "Reason"]);
    for source in &report.sources {
        sources.add_row(vec![
            Cell::new(&source.source_id).add_attribute(Attribute::Bold),
            Cell::new(&source.status),
            Cell::new(source.candidates),
            Cell::new(source.reason.as_deref().unwrap_or("")),
        ]);
    }
    println!("{sources}");

    if !report.records.is_empty() {
        let mut records = Table::new();
        records.load_preset(comfy_table::presets::UTF8_FULL);
        records.set_header(vec!["Title", "Year", "Sources", "Status"]);
        for record in &report.records {
            records.add_row(vec![
                Cell::new(truncate(&record.title, 60)).add_attribute(Attribute::Bold),
                Cell::new(record.year.map(|y| y.to_string()).unwrap_or_default()),
                Cell::new(record.source_ids.join(", ")),
                Cell::new(&record.status),
            ]);
        }
        println!("{records}");
    }

    println!(
        "{} records: {} enriched, {} enrichment failed{}",
        report.records.len(),
        report.enriched,
        report.enrichment_failed,
        report
            .upserted
            .map(|n| format!(", {} written to sink", n))
            .unwrap_or_default()
    );
    Ok(())
}

fn output_runs(reports: &[RunReport], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let runs: Vec<_> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "run_id": r.run_id,
                    "query": r.query,
                    "stage": r.stage,
                    "records": r.records.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    use comfy_table::{Cell, Table};
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Run", "Query", "Stage", "Records"]);
    for report in reports {
        table.add_row(vec![
            Cell::new(&report.run_id),
            Cell::new(truncate(&report.query, 50)),
            Cell::new(report.stage.progress()),
            Cell::new(report.records.len()),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn output_sources(registry: &SourceRegistry, config: &Config, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let sources: Vec<_> = registry
            .all()
            .map(|s| {
                serde_json::json!({
                    "id": s.id(),
                    "name": s.name(),
                    "requests_per_second": config.rate_for(s.id()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    use comfy_table::{Cell, Table};
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["ID", "Name", "Rate limit"]);
    for source in registry.all() {
        table.add_row(vec![
            Cell::new(source.id()),
            Cell::new(source.name()),
            Cell::new(
                config
                    .rate_for(source.id())
                    .map(|r| format!("{} req/s", r))
                    .unwrap_or_else(|| "source default".to_string()),
            ),
        ]);
    }
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_run_command() {
        let cli = Cli::parse_from([
            "scholar-harvest",
            "run",
            "graph neural networks",
            "--source",
            "arxiv",
            "--source",
            "semantic",
            "-j",
            "8",
        ]);
        match cli.command {
            Commands::Run {
                query,
                max_results,
                source,
                concurrency,
            } => {
                assert_eq!(query, "graph neural networks");
                assert_eq!(max_results, None);
                assert_eq!(source, vec!["arxiv", "semantic"]);
                assert_eq!(concurrency, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "scholar-harvest",
            "-vv",
            "--output",
            "json",
            "--log-format",
            "json",
            "resume",
            "20240101T000000-abcdef01",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(matches!(cli.command, Commands::Resume { .. }));
    }

    #[test]
    fn test_cli_config_init() {
        let cli = Cli::parse_from(["scholar-harvest", "config", "init", "/tmp/x.toml", "--force"]);
        match cli.command {
            Commands::Config {
                action: ConfigAction::Init { path, force },
            } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/x.toml")));
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
