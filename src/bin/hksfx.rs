//! HKSFX CLI - Command-line interface for the HKSFX relay
//!
//! Commands:
//! - run: Import new samples of every metric and forward them to ingest
//! - preview: Show the data points the next run would send for one metric
//! - catalogue: Print the tracked metrics and their ingest mapping
//! - credentials: Show or set the ingest realm and access token
//! - cursors: List or reset persisted cursors
//! - validate: Validate a raw sample file

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use hksfx::catalogue::{self, CATALOGUE};
use hksfx::{
    Credentials, CredentialsStore, CursorStore, DataPoint, FileStore, HealthMetric, JobStatus,
    LoggingConfig, MetricForwarder, Relay, RelayConfig, RelayError, ReplaySource, RunSummary,
    SampleParser, SamplePoller, VERSION,
};

/// HKSFX - Relay device health samples to SignalFx ingest
#[derive(Parser)]
#[command(name = "hksfx")]
#[command(version = VERSION)]
#[command(about = "Forward new health samples as SignalFx metrics", long_about = None)]
struct Cli {
    /// Store file for cursors and credentials (overrides HKSFX_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Key namespace (overrides HKSFX_NAMESPACE)
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import new samples and forward them to ingest
    Run {
        /// Sample file (JSON array or NDJSON) served as the health store
        #[arg(short, long)]
        samples: PathBuf,

        /// Only run the job of this metric
        #[arg(short, long, value_parser = parse_metric)]
        metric: Option<HealthMetric>,

        /// Refuse read access to a metric (repeatable)
        #[arg(long, value_parser = parse_metric)]
        deny: Vec<HealthMetric>,

        /// Ingest endpoint (overrides HKSFX_INGEST_URL and the realm)
        #[arg(long)]
        ingest_url: Option<String>,

        /// Maximum samples per poll (overrides HKSFX_QUERY_LIMIT)
        #[arg(long)]
        limit: Option<usize>,

        /// Output the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the data points the next run would send, without sending them
    Preview {
        /// Sample file (JSON array or NDJSON) served as the health store
        #[arg(short, long)]
        samples: PathBuf,

        #[arg(short, long, value_parser = parse_metric)]
        metric: HealthMetric,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the metric catalogue
    Catalogue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or change ingest credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Inspect or reset persisted cursors
    Cursors {
        #[command(subcommand)]
        action: CursorsAction,
    },

    /// Validate a raw sample file
    Validate {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Print the realm and whether a token is stored
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Store the realm and/or access token
    Set {
        #[arg(long)]
        realm: Option<String>,

        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum CursorsAction {
    /// List metrics with a stored cursor
    List {
        #[arg(long)]
        json: bool,
    },
    /// Forget cursors so the next run re-imports the full history
    Reset {
        /// Metric to reset; all metrics when omitted
        #[arg(short, long, value_parser = parse_metric)]
        metric: Option<HealthMetric>,
    },
}

fn parse_metric(value: &str) -> Result<HealthMetric, String> {
    HealthMetric::from_identifier(value)
        .or_else(|| {
            HealthMetric::ALL
                .iter()
                .copied()
                .find(|m| m.friendly_name().eq_ignore_ascii_case(value))
        })
        .ok_or_else(|| {
            let known: Vec<&str> = HealthMetric::ALL.iter().map(|m| m.short_name()).collect();
            format!("unknown metric '{}', expected one of: {}", value, known.join(", "))
        })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let fatal = matches!(e, HksfxCliError::RunFailed { fatal: true, .. });
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            if fatal {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<(), HksfxCliError> {
    LoggingConfig::from_env().verbose(cli.verbose).init()?;

    let mut config = RelayConfig::from_env()?;
    if let Some(store) = cli.store {
        config = config.with_store_path(store);
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }

    match cli.command {
        Commands::Run {
            samples,
            metric,
            deny,
            ingest_url,
            limit,
            json,
        } => {
            if let Some(url) = ingest_url {
                config = config.with_ingest_url(&url)?;
            }
            if let Some(limit) = limit {
                config.query_limit = limit;
            }
            cmd_run(&config, &samples, metric, &deny, json).await
        }

        Commands::Preview {
            samples,
            metric,
            json,
        } => cmd_preview(&config, &samples, metric, json).await,

        Commands::Catalogue { json } => cmd_catalogue(json),

        Commands::Credentials { action } => cmd_credentials(&config, action),

        Commands::Cursors { action } => cmd_cursors(&config, action),

        Commands::Validate { input, json } => cmd_validate(&input, json),
    }
}

struct Stores {
    store: Arc<FileStore>,
    namespace: String,
}

impl Stores {
    fn open(config: &RelayConfig) -> Result<Self, HksfxCliError> {
        let store = FileStore::open(&config.store_path).map_err(RelayError::from)?;
        Ok(Self {
            store: Arc::new(store),
            namespace: config.namespace.clone(),
        })
    }

    fn credentials(&self) -> CredentialsStore {
        CredentialsStore::new(self.store.clone(), self.store.clone(), &self.namespace)
    }

    fn cursors(&self) -> CursorStore {
        CursorStore::new(self.store.clone(), &self.namespace)
    }
}

fn build_relay(config: &RelayConfig, source: Arc<ReplaySource>) -> Result<Relay, HksfxCliError> {
    let stores = Stores::open(config)?;

    let mut forwarder = MetricForwarder::with_timeout(stores.credentials(), config.timeout)?;
    if let Some(url) = &config.ingest_url {
        forwarder = forwarder.with_ingest_url(url.clone());
    }
    let poller = SamplePoller::new(source).with_limit(config.query_limit);

    Ok(Relay::new(poller, forwarder, stores.cursors()))
}

async fn cmd_run(
    config: &RelayConfig,
    samples: &Path,
    metric: Option<HealthMetric>,
    deny: &[HealthMetric],
    json: bool,
) -> Result<(), HksfxCliError> {
    let source = Arc::new(ReplaySource::load(samples)?);
    for denied in deny {
        source.deny(*denied);
    }
    let relay = build_relay(config, source)?;

    let summary = match metric {
        Some(metric) => RunSummary {
            jobs: vec![relay.run_metric(metric).await],
        },
        None => relay.run().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    let failed = summary.count(JobStatus::Failed);
    if failed > 0 {
        Err(HksfxCliError::RunFailed {
            failed,
            fatal: summary.has_fatal(),
        })
    } else {
        Ok(())
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Import Report");
    println!("=============");

    for job in &summary.jobs {
        let status_icon = match job.status {
            JobStatus::Completed => "[OK]",
            JobStatus::NoSamples => "[--]",
            JobStatus::Failed => "[ERR]",
            JobStatus::Pending => "[..]",
        };
        println!(
            "  {:<5} {}: {:?} ({} data points)",
            status_icon,
            job.metric.friendly_name(),
            job.status,
            job.data_points
        );
        if let Some(error) = &job.error {
            println!("        {}", error);
        }
    }

    println!("\nData points forwarded: {}", summary_forwarded(summary));
}

fn summary_forwarded(summary: &RunSummary) -> usize {
    summary
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .map(|j| j.data_points)
        .sum()
}

async fn cmd_preview(
    config: &RelayConfig,
    samples: &Path,
    metric: HealthMetric,
    json: bool,
) -> Result<(), HksfxCliError> {
    let source = Arc::new(ReplaySource::load(samples)?);
    let relay = build_relay(config, source)?;
    let points = relay.preview(metric).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&points)?);
        return Ok(());
    }

    println!("{}: {} new data points", metric.friendly_name(), points.len());
    for point in &points {
        print_point(point);
    }
    Ok(())
}

fn print_point(point: &DataPoint) {
    println!(
        "  {}  {} = {}",
        point.timestamp.to_rfc3339(),
        point.metric_name,
        point.value
    );
}

fn cmd_catalogue(json: bool) -> Result<(), HksfxCliError> {
    let rows: Vec<CatalogueRow> = CATALOGUE
        .iter()
        .map(|entry| CatalogueRow {
            identifier: entry.metric.short_name(),
            kind: entry.kind.batch_name(),
            metric: entry.metric_name,
            unit: entry.unit.as_str(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{:<20} {:<10} {:<30} UNIT", "IDENTIFIER", "KIND", "METRIC");
        for row in &rows {
            println!(
                "{:<20} {:<10} {:<30} {}",
                row.identifier, row.kind, row.metric, row.unit
            );
        }
        let (name, value) = catalogue::HIRES_DIMENSION;
        println!("\nEvery data point carries dimension {}={}", name, value);
    }
    Ok(())
}

fn cmd_credentials(config: &RelayConfig, action: CredentialsAction) -> Result<(), HksfxCliError> {
    let credentials = Stores::open(config)?.credentials();

    match action {
        CredentialsAction::Show { json } => {
            let current = credentials.load()?;
            let endpoint = config
                .ingest_url
                .clone()
                .unwrap_or_else(|| current.ingest_url());
            if json {
                let view = CredentialsView {
                    realm: current.realm.clone(),
                    token_set: current.has_token(),
                    endpoint,
                };
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("Realm:    {}", current.realm);
                println!(
                    "Token:    {}",
                    if current.has_token() { "set" } else { "not set" }
                );
                println!("Endpoint: {}", endpoint);
            }
            Ok(())
        }
        CredentialsAction::Set { realm, token } => {
            if realm.is_none() && token.is_none() {
                return Err(HksfxCliError::NothingToSet);
            }
            let current = credentials.load()?;
            let updated = Credentials::new(
                realm.unwrap_or(current.realm),
                token.unwrap_or(current.token),
            );
            credentials.save(&updated)?;
            println!("Credentials saved ({:?})", updated);
            Ok(())
        }
    }
}

fn cmd_cursors(config: &RelayConfig, action: CursorsAction) -> Result<(), HksfxCliError> {
    let cursors = Stores::open(config)?.cursors();

    match action {
        CursorsAction::List { json } => {
            let stored = cursors.list()?;
            if json {
                let names: Vec<&str> = stored.iter().map(|m| m.short_name()).collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if stored.is_empty() {
                println!("No cursors stored");
            } else {
                for metric in stored {
                    println!("  {}  ({})", metric.friendly_name(), cursors.key(metric));
                }
            }
            Ok(())
        }
        CursorsAction::Reset { metric } => {
            let targets = match metric {
                Some(metric) => vec![metric],
                None => HealthMetric::ALL.to_vec(),
            };
            for metric in &targets {
                cursors.clear(*metric)?;
            }
            println!("Reset {} cursor(s)", targets.len());
            Ok(())
        }
    }
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), HksfxCliError> {
    let content = fs::read_to_string(input)?;
    let samples = SampleParser::parse(&content)?;
    let results = SampleParser::validate_samples(&samples);

    let untracked = samples
        .iter()
        .filter(|s| catalogue::lookup(&s.identifier).is_none())
        .count();

    let report = ValidationReport {
        total_samples: samples.len(),
        valid_samples: samples.len() - results.len(),
        invalid_samples: results.len(),
        untracked_samples: untracked,
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                sample_id: r.sample_id.clone(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total samples:     {}", report.total_samples);
        println!("Valid samples:     {}", report.valid_samples);
        println!("Invalid samples:   {}", report.invalid_samples);
        println!("Untracked samples: {}", report.untracked_samples);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Sample {} (index {}): {}",
                    err.sample_id, err.index, err.error
                );
            }
        }
    }

    if report.invalid_samples > 0 {
        Err(HksfxCliError::ValidationFailed(report.invalid_samples))
    } else {
        Ok(())
    }
}

// Error handling

enum HksfxCliError {
    Io(std::io::Error),
    Relay(RelayError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    RunFailed { failed: usize, fatal: bool },
    NothingToSet,
}

impl From<std::io::Error> for HksfxCliError {
    fn from(e: std::io::Error) -> Self {
        HksfxCliError::Io(e)
    }
}

impl From<RelayError> for HksfxCliError {
    fn from(e: RelayError) -> Self {
        HksfxCliError::Relay(e)
    }
}

impl From<serde_json::Error> for HksfxCliError {
    fn from(e: serde_json::Error) -> Self {
        HksfxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HksfxCliError> for CliError {
    fn from(e: HksfxCliError) -> Self {
        match e {
            HksfxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HksfxCliError::Relay(e) => relay_error(e),
            HksfxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            HksfxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            HksfxCliError::RunFailed { failed, fatal } => CliError {
                code: if fatal { "RUN_ABORTED" } else { "RUN_FAILED" }.to_string(),
                message: format!("{} import job(s) failed", failed),
                hint: Some(if fatal {
                    "A stored cursor is unreadable; inspect it or run 'hksfx cursors reset --metric <metric>'".to_string()
                } else {
                    "Cursors were not advanced for failed jobs; rerun to retry".to_string()
                }),
            },
            HksfxCliError::NothingToSet => CliError {
                code: "NOTHING_TO_SET".to_string(),
                message: "Neither --realm nor --token was given".to_string(),
                hint: Some("Pass --realm, --token or both".to_string()),
            },
        }
    }
}

fn relay_error(e: RelayError) -> CliError {
    let (code, hint) = match &e {
        RelayError::Permission(_) => (
            "PERMISSION_ERROR",
            Some("Grant read access to the metric and retry"),
        ),
        RelayError::Query { .. } => ("QUERY_ERROR", Some("The health store query failed; retry later")),
        RelayError::Forward(_) => (
            "FORWARD_ERROR",
            Some("Check the realm, token and network connectivity"),
        ),
        RelayError::CursorDeserialization { .. } => (
            "CURSOR_ERROR",
            Some("Inspect the store file or reset the cursor with 'hksfx cursors reset'"),
        ),
        RelayError::Conversion { .. } => ("CONVERSION_ERROR", Some("Check sample units")),
        RelayError::Store(_) => ("STORE_ERROR", Some("Check the store file and its permissions")),
        RelayError::Config(_) => ("CONFIG_ERROR", Some("Check HKSFX_* environment variables and flags")),
        RelayError::Parse(_) => ("PARSE_ERROR", Some("Ensure input is a JSON array or NDJSON of samples")),
        RelayError::Json(_) => ("JSON_ERROR", Some("Check JSON syntax")),
        RelayError::Logging(_) => ("LOGGING_ERROR", None),
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: hint.map(str::to_string),
    }
}

// Report types

#[derive(serde::Serialize)]
struct CatalogueRow {
    identifier: &'static str,
    kind: &'static str,
    metric: &'static str,
    unit: &'static str,
}

#[derive(serde::Serialize)]
struct CredentialsView {
    realm: String,
    token_set: bool,
    endpoint: String,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_samples: usize,
    valid_samples: usize,
    invalid_samples: usize,
    untracked_samples: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    sample_id: String,
    error: String,
}
