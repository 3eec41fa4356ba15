//! Opportunity Scan Core - detection and scoring CLI
//!
//! The main entry point for opp-core, handling:
//! - Scanning exported metrics for opportunities
//! - Configuration validation
//! - Rule catalog and schema inspection

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use opp_common::{EntityType, OutputFormat, SCHEMA_VERSION};
use opp_core::config::{list_presets, load_config, ConfigError, ConfigOptions, PresetName, ResolvedConfig};
use opp_core::engine::{CancellationToken, DetectionEngine, RunOptions};
use opp_core::exit_codes::ExitCode;
use opp_core::logging::{event_names, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage};
use opp_core::opportunity::Opportunity;
use opp_core::output::render_report;
use opp_core::rule::Rule;
use opp_core::sink::{write_with_retry, JsonlSink, RetryPolicy};
use opp_core::source::{DateRange, MemoryMetricSource};

/// Opportunity Scan Core - detect and score marketing opportunities
#[derive(Parser)]
#[command(name = "opp-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Log level (overrides OPP_LOG / RUST_LOG)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format on stderr: human or jsonl (overrides OPP_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every rule against every entity for one period
    Scan(ScanArgs),

    /// Validate policy and rule configuration
    Check(ConfigArgs),

    /// List the active rule catalog
    Rules(ConfigArgs),

    /// Print the JSON schema of an opportunity
    Schema,

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Scoring policy file
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Rule catalog file
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Named scoring preset (balanced, conservative, aggressive)
    #[arg(long, conflicts_with = "policy")]
    preset: Option<PresetName>,
}

impl ConfigArgs {
    fn options(&self) -> ConfigOptions {
        ConfigOptions {
            policy_path: self.policy.clone(),
            rules_path: self.rules.clone(),
            preset: self.preset,
        }
    }
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Metric export (JSON array or JSONL of rows)
    #[arg(long)]
    metrics: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,

    /// First day of the evaluated period (default: latest period in the export)
    #[arg(long, requires = "period_end")]
    period_start: Option<NaiveDate>,

    /// Last day of the evaluated period
    #[arg(long, requires = "period_start")]
    period_end: Option<NaiveDate>,

    /// Restrict to these entity types (repeatable)
    #[arg(long = "entity-type", value_enum)]
    entity_types: Vec<EntityType>,

    /// Restrict to these rule ids (repeatable)
    #[arg(long = "rule")]
    rule_ids: Vec<String>,

    /// Override engine.max_workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Override engine.batch_size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop starting new batches after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Append detected opportunities to this JSONL file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Fixed detection timestamp (RFC 3339) for reproducible output
    #[arg(long)]
    detected_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Clean,
                _ => ExitCode::ArgsError,
            };
            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    init_logging(&LogConfig::from_env(
        cli.global.log_level,
        cli.global.log_format,
    ));

    let exit_code = match &cli.command {
        Commands::Scan(args) => run_scan(&cli.global, args),
        Commands::Check(args) => run_check(&cli.global, args),
        Commands::Rules(args) => run_rules(&cli.global, args),
        Commands::Schema => run_schema(),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Commands
// ============================================================================

fn run_scan(global: &GlobalOpts, args: &ScanArgs) -> ExitCode {
    let options = match args.detected_at {
        Some(at) => RunOptions::at(at),
        None => RunOptions::default(),
    };
    let ctx = LogContext::new(options.run_id.clone());

    let config = match load(global, &args.config, &ctx) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let source = match MemoryMetricSource::load(&args.metrics) {
        Ok(source) => source,
        Err(e) => return report_error(global, &e.into()),
    };
    log_rows(&ctx, &source);

    let period = match (args.period_start, args.period_end) {
        (Some(start), Some(end)) if end < start => {
            return usage_error(global, "--period-end is before --period-start");
        }
        (Some(start), Some(end)) => DateRange::new(start, end),
        _ => match source.latest_period() {
            Some(period) => period,
            None => return usage_error(global, "metrics export has no rows; pass --period-start/--period-end"),
        },
    };

    let mut settings = config.policy.engine.clone();
    if let Some(workers) = args.max_workers {
        settings.max_workers = workers.max(1);
    }
    if let Some(size) = args.batch_size {
        settings.batch_size = size.max(1);
    }

    let entities: Vec<_> = source
        .entities()
        .into_iter()
        .filter(|e| args.entity_types.is_empty() || args.entity_types.contains(&e.entity_type))
        .collect();

    if let Some(unknown) = args
        .rule_ids
        .iter()
        .find(|id| config.catalog.get(id).is_none())
    {
        return usage_error(global, &format!("unknown rule id: {unknown}"));
    }
    let rules: Vec<Rule> = Rule::from_catalog(&config.catalog)
        .into_iter()
        .filter(|r| args.rule_ids.is_empty() || args.rule_ids.iter().any(|id| id == r.id().as_str()))
        .collect();

    let cancel = CancellationToken::new();
    if let Some(secs) = args.timeout {
        cancel.cancel_after(Duration::from_secs(secs));
    }

    let engine = DetectionEngine::new(Arc::new(source), config.policy.clone(), settings);
    let report = engine
        .run_with_options(&entities, &rules, period, &cancel, &options)
        .with_config(config.snapshot.clone());

    let mut sink_failed = false;
    if let Some(path) = &args.out {
        let sink = JsonlSink::new(path);
        if let Err(e) = write_with_retry(&sink, &report.opportunities, &RetryPolicy::default(), &ctx) {
            eprintln!("{}", e.format_human());
            sink_failed = true;
        }
    }

    match render_report(&report, global.format) {
        Ok(rendered) => emit(&rendered),
        Err(e) => return report_error(global, &e.into()),
    }

    ExitCode::for_report(&report, sink_failed)
}

fn run_check(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    let ctx = LogContext::new(opp_core::logging::generate_run_id());
    let config = match load(global, args, &ctx) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let snapshot = &config.snapshot;
    match global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "status": "ok",
                "policy": {
                    "source": snapshot.policy_source,
                    "path": snapshot.policy_path,
                    "hash": snapshot.policy_hash,
                    "preset": config.preset.map(|p| p.as_str()),
                },
                "rules": {
                    "source": snapshot.rules_source,
                    "path": snapshot.rules_path,
                    "hash": snapshot.rules_hash,
                    "count": config.catalog.rules.len(),
                    "enabled": config.catalog.enabled().count(),
                },
                "engine": &config.policy.engine,
                "presets": list_presets(),
            });
            emit_json(&response, global.format);
        }
        OutputFormat::Summary => {
            emit(&format!(
                "[ok] policy: {}, rules: {} ({} enabled)\n",
                snapshot.policy_source,
                snapshot.rules_source,
                config.catalog.enabled().count()
            ));
        }
        OutputFormat::Md => {
            let mut out = String::from("# opp-core check\n\n");
            out.push_str(&format!(
                "✓ policy: {} {}\n",
                snapshot.policy_source,
                snapshot.policy_path.as_deref().unwrap_or("")
            ));
            out.push_str(&format!(
                "✓ rules: {} {} ({} rules)\n",
                snapshot.rules_source,
                snapshot.rules_path.as_deref().unwrap_or(""),
                config.catalog.rules.len()
            ));
            emit(&out);
        }
    }
    ExitCode::Clean
}

fn run_rules(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    let ctx = LogContext::new(opp_core::logging::generate_run_id());
    let config = match load(global, args, &ctx) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match global.format {
        OutputFormat::Json => emit_json(&config.catalog, OutputFormat::Json),
        OutputFormat::Jsonl => {
            for rule in &config.catalog.rules {
                emit_json(rule, OutputFormat::Jsonl);
            }
        }
        OutputFormat::Summary => {
            emit(&format!(
                "{} rules ({} enabled)\n",
                config.catalog.rules.len(),
                config.catalog.enabled().count()
            ));
        }
        OutputFormat::Md => {
            let mut out = String::from("| Rule | Category | Entity types | Title |\n|---|---|---|---|\n");
            for rule in &config.catalog.rules {
                let types: Vec<_> = rule
                    .applicable_entity_types
                    .iter()
                    .map(|t| t.as_str())
                    .collect();
                let marker = if rule.enabled { "" } else { " (disabled)" };
                out.push_str(&format!(
                    "| {}{} | {} | {} | {} |\n",
                    rule.id,
                    marker,
                    rule.category,
                    types.join(", "),
                    rule.title
                ));
            }
            emit(&out);
        }
    }
    ExitCode::Clean
}

fn run_schema() -> ExitCode {
    let schema = schemars::schema_for!(Opportunity);
    emit_json(&schema, OutputFormat::Json);
    ExitCode::Clean
}

fn print_version(global: &GlobalOpts) {
    let version = env!("CARGO_PKG_VERSION");
    match global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let info = serde_json::json!({
                "name": "opp-core",
                "version": version,
                "schema_version": SCHEMA_VERSION,
                "config_schema_version": opp_config::CONFIG_SCHEMA_VERSION,
            });
            emit_json(&info, global.format);
        }
        _ => emit(&format!("opp-core {version} (schema {SCHEMA_VERSION})\n")),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load(global: &GlobalOpts, args: &ConfigArgs, ctx: &LogContext) -> Result<ResolvedConfig, ExitCode> {
    match load_config(&args.options()) {
        Ok(config) => {
            opp_core::log_event!(
                ctx,
                INFO,
                event_names::CONFIG_LOADED,
                Stage::Init,
                "configuration loaded",
                policy_source = config.snapshot.policy_source.as_str(),
                rules_source = config.snapshot.rules_source.as_str(),
                rules = config.catalog.rules.len() as u64
            );
            if config.snapshot.policy_hash.is_none() && config.preset.is_none() {
                opp_core::log_event!(
                    ctx,
                    DEBUG,
                    event_names::CONFIG_DEFAULT_USED,
                    Stage::Init,
                    "no policy file found, using builtin policy"
                );
            }
            Ok(config)
        }
        Err(e) => {
            opp_core::log_event!(
                ctx,
                ERROR,
                event_names::CONFIG_ERROR,
                Stage::Init,
                "configuration failed to load",
                error = e.to_string().as_str()
            );
            Err(config_error(global, e))
        }
    }
}

fn config_error(global: &GlobalOpts, error: ConfigError) -> ExitCode {
    if error.is_usage_error() {
        return usage_error(global, &error.to_string());
    }
    report_error(global, &error.into())
}

fn log_rows(ctx: &LogContext, source: &MemoryMetricSource) {
    opp_core::log_event!(
        ctx,
        INFO,
        event_names::LOAD_ROWS,
        Stage::Load,
        "metric rows loaded",
        rows = source.rows().len() as u64,
        entities = source.entities().len() as u64,
        metrics = source.metric_names().len() as u64
    );
}

/// Write an error to stderr in the chosen format and map it to an exit code.
fn report_error(global: &GlobalOpts, error: &opp_common::Error) -> ExitCode {
    let exit_code = ExitCode::for_error(error);
    match global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "status": "error",
                "exit_code": exit_code.code_name(),
                "error": error.to_structured(),
            });
            eprintln!("{response}");
        }
        _ => eprintln!("{}", error.format_human()),
    }
    exit_code
}

fn usage_error(global: &GlobalOpts, message: &str) -> ExitCode {
    match global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "status": "error",
                "exit_code": ExitCode::ArgsError.code_name(),
                "error": { "message": message },
            });
            eprintln!("{response}");
        }
        _ => eprintln!("error: {message}"),
    }
    ExitCode::ArgsError
}

fn emit_json<T: serde::Serialize + ?Sized>(value: &T, format: OutputFormat) {
    let rendered = match format {
        OutputFormat::Jsonl => serde_json::to_string(value),
        _ => serde_json::to_string_pretty(value),
    };
    match rendered {
        Ok(s) => emit(&format!("{s}\n")),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

/// stdout is the payload channel; a closed pipe is not an error worth a panic.
fn emit(s: &str) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(s.as_bytes());
    let _ = out.flush();
}
