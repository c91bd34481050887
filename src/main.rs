use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use gcp_fetch::config::Config;
use gcp_fetch::gcp::auth::GcpCredentials;
use gcp_fetch::gcp::client::GcpClient;
use gcp_fetch::gcp::projects::{list_projects, resolve_projects};
use gcp_fetch::pipeline::{config_paginator, FetchStatus, Pipeline, RunSummary};
use gcp_fetch::resource::{all_tables, Outputs, RelationDef};
use gcp_fetch::sink::{JsonLinesSink, SinkTarget};
use gcp_fetch::VERSION;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Fetch Google Cloud resources into relational tables
#[derive(Parser, Debug)]
#[command(name = "gcp-fetch", version, about, long_about = None)]
struct Args {
    /// Config file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch tables for every resolved project
    Fetch(FetchArgs),
    /// List the tables that can be fetched, with their relation tables
    Tables,
    /// List the active projects visible to the credentials
    Projects {
        /// Resource Manager filter expression
        #[arg(long)]
        project_filter: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct FetchArgs {
    /// Projects to fetch; skips project discovery
    #[arg(long, value_delimiter = ',')]
    project_ids: Vec<String>,

    /// Resource Manager filter used for project discovery
    #[arg(long)]
    project_filter: Option<String>,

    /// Tables to fetch (default: all)
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Write one <table>.jsonl per table here instead of stdout
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Maximum concurrent (project, table) fetches
    #[arg(long)]
    concurrency: Option<usize>,
}

impl FetchArgs {
    fn apply(&self, config: &mut Config) {
        if !self.project_ids.is_empty() {
            config.project_ids = self.project_ids.clone();
        }
        if self.project_filter.is_some() {
            config.project_filter = self.project_filter.clone();
        }
        if !self.tables.is_empty() {
            config.tables = self.tables.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let guard = match log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            guard
        }
        None => {
            let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_target(false)
                .init();
            guard
        }
    };

    tracing::debug!("gcp-fetch {} started with log level: {:?}", VERSION, level);
    Ok(guard)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded without failed fetches
async fn run(args: Args) -> Result<bool> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env();

    match args.command {
        Command::Tables => {
            print_tables();
            Ok(true)
        }
        Command::Projects { project_filter } => {
            if project_filter.is_some() {
                config.project_filter = project_filter;
            }
            config.validate()?;
            print_projects(&config).await?;
            Ok(true)
        }
        Command::Fetch(fetch) => {
            fetch.apply(&mut config);
            config.validate()?;
            let summary = fetch_all(&config, fetch.output_dir).await?;
            Ok(!summary.has_failures())
        }
    }
}

async fn connect(config: &Config) -> Result<GcpClient> {
    let credentials = GcpCredentials::new(config.service_account_key_json.as_deref())
        .await
        .context("Failed to load GCP credentials")?;
    Ok(GcpClient::new(credentials, config.endpoints.clone())?)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight fetches");
            token.cancel();
        }
    });
    cancel
}

async fn fetch_all(config: &Config, output_dir: Option<PathBuf>) -> Result<RunSummary> {
    let tables = config.selected_tables()?;
    let client = connect(config).await?;
    let cancel = cancel_on_ctrl_c();

    let (outputs, receivers) = Outputs::for_tables(&tables, config.channel_capacity);
    let target = match output_dir {
        Some(dir) => SinkTarget::Directory(dir),
        None => SinkTarget::Stdout,
    };
    let sink = JsonLinesSink::new(target).spawn(receivers);

    let pipeline = Pipeline::from_config(client, config, outputs);
    let projects = resolve_projects(pipeline.client(), pipeline.paginator(), config, &cancel)
        .await
        .context("Failed to resolve projects")?;

    let summary = pipeline.run(&projects, &tables, &cancel).await;
    // Closes every channel so the sink can finish
    drop(pipeline);

    sink.await.context("Sink task panicked")??;
    report(&summary);
    Ok(summary)
}

fn report(summary: &RunSummary) {
    let (resources, relations) = summary.rows();
    tracing::info!(
        "Fetched {} resources and {} relation rows from {} fetches ({} skipped)",
        resources,
        relations,
        summary.outcomes.len(),
        summary.skipped()
    );

    for outcome in &summary.outcomes {
        match &outcome.status {
            FetchStatus::Failed(err) => {
                tracing::error!("{} / {}: {}", outcome.project_id, outcome.table, err)
            }
            FetchStatus::Cancelled => {
                tracing::warn!("{} / {}: cancelled", outcome.project_id, outcome.table)
            }
            FetchStatus::Completed { .. } | FetchStatus::Skipped { .. } => {}
        }
    }
}

fn print_tables() {
    for table in all_tables() {
        println!("{}\t{}", table.name, table.description);
        print_relations(&table.relations, 1);
    }
}

fn print_relations(relations: &[RelationDef], depth: usize) {
    for relation in relations {
        println!("{}{}\t{}", "  ".repeat(depth), relation.name, relation.description);
        print_relations(&relation.relations, depth + 1);
    }
}

async fn print_projects(config: &Config) -> Result<()> {
    let client = connect(config).await?;
    let cancel = cancel_on_ctrl_c();
    let paginator = config_paginator(config);

    let projects = list_projects(
        &client,
        &paginator,
        config.project_filter.as_deref(),
        &cancel,
    )
    .await?;

    for project in projects {
        println!(
            "{}\t{}\t{}",
            project.project_id, project.project_number, project.name
        );
    }
    Ok(())
}
