mod config;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use config::{load_config, BackendName, GlobalConfig, RunConfig};
use mtrprom_collect::build_snapshot;
use mtrprom_expo::{render, write_atomic};
use mtrprom_model::{LabelSet, ProbeDefinition, Snapshot};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mtrprom",
    version,
    about = "Measure network paths with mtr and publish Prometheus textfile metrics"
)]
struct Cli {
    /// Log at debug level (otherwise RUST_LOG, defaulting to info).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Probe(ProbeArgs),
}

#[derive(Args)]
#[command(about = "Measure every probe listed in a YAML config file and write one snapshot.")]
struct RunArgs {
    #[arg(long)]
    config: PathBuf,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args)]
#[command(
    about = "Measure a single target. Only target networks you own or have permission to test."
)]
struct ProbeArgs {
    target: String,

    #[arg(long, default_value = "default")]
    probe_name: String,

    #[arg(long, short, default_value_t = 443)]
    port: u16,

    /// Extra label as KEY=VALUE, repeatable.
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Default)]
struct GlobalArgs {
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, short = 'c')]
    cycles: Option<u32>,

    #[arg(long, short)]
    interval: Option<f64>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    deadline_secs: Option<u64>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    retries: Option<u32>,

    /// Skip reverse DNS lookups.
    #[arg(long)]
    numeric: bool,

    #[arg(long, value_enum)]
    backend: Option<BackendName>,

    /// Path to the mtr or traceroute binary.
    #[arg(long)]
    program: Option<PathBuf>,

    #[arg(long)]
    jitter_weight: Option<f64>,

    #[arg(long)]
    variance_weight: Option<f64>,

    /// Also write the snapshot as JSON to this path.
    #[arg(long)]
    json_output: Option<PathBuf>,
}

impl From<GlobalArgs> for GlobalConfig {
    fn from(args: GlobalArgs) -> Self {
        GlobalConfig {
            output: args.output,
            output_dir: args.output_dir,
            mtr_cycles: args.cycles,
            probe_timeout_secs: args.timeout_secs,
            deadline_secs: args.deadline_secs,
            workers: args.workers,
            retries: args.retries,
            interval_secs: args.interval,
            numeric: args.numeric.then_some(true),
            backend: args.backend,
            program: args.program,
            jitter_weight: args.jitter_weight,
            variance_weight: args.variance_weight,
            json_output: args.json_output,
        }
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    Ok((key.trim().to_string(), value.to_string()))
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match cli.command {
        Commands::Run(args) => {
            let file = load_config(&args.config)?;
            let global = file.global.overlay(args.global.into());
            RunConfig::resolve(global, file.probes)?
        }
        Commands::Probe(args) => {
            let labels = LabelSet::try_from(args.labels)?;
            let probe = ProbeDefinition::new(&args.probe_name, &args.target, args.port, labels)?;
            let defaults = GlobalConfig {
                output: Some(PathBuf::from("mtr_metrics.prom")),
                ..GlobalConfig::default()
            };
            RunConfig::resolve(defaults.overlay(args.global.into()), vec![probe])?
        }
    };

    run_cycle(&config)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_cycle(config: &RunConfig) -> Result<()> {
    if config.probes.is_empty() {
        warn!("no probes configured; writing an empty snapshot");
    }
    info!(
        probes = config.probes.len(),
        workers = config.collect.workers,
        cycles = config.collect.cycles,
        output = %config.output.display(),
        "starting collection"
    );

    let prober = Arc::new(config.prober());
    let snapshot = build_snapshot(&config.probes, &config.collect, prober);
    log_summary(&snapshot);

    let text = render(&snapshot);
    write_atomic(&config.output, text.as_bytes())?;
    info!(
        output = %config.output.display(),
        bytes = text.len(),
        "wrote metrics"
    );

    if let Some(path) = &config.json_output {
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| anyhow!("failed to serialize snapshot: {err}"))?;
        write_atomic(path, &json)?;
        info!(output = %path.display(), "wrote snapshot json");
    }

    Ok(())
}

fn log_summary(snapshot: &Snapshot) {
    for result in &snapshot.results {
        match (&result.stats, &result.error) {
            (Some(stats), _) => info!(
                probe = %result.probe.name,
                target = %result.probe.target,
                score = %format!("{:.1}", stats.path_health_score),
                loss_percent = %format!("{:.1}", stats.end_to_end.loss_percent),
                avg_rtt_ms = %format!("{:.3}", stats.end_to_end.avg_rtt_ms),
                responding = stats.responding_hops,
                hops = result.hop_count(),
                "probe summary"
            ),
            (None, error) => warn!(
                probe = %result.probe.name,
                target = %result.probe.target,
                status = result.status.as_str(),
                error = %error.as_ref().map(ToString::to_string).unwrap_or_default(),
                attempts = result.attempts,
                "probe summary"
            ),
        }
    }
    info!(
        succeeded = snapshot.succeeded(),
        total = snapshot.results.len(),
        "cycle complete"
    );
}
