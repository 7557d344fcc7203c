mod config;
mod http;
mod protocol;
mod reports;
mod runner;
mod session;
mod ticker;
mod workbook;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use wheeltally_engine::{SamplingLoop, Tally, WheelRng};

use config::{ServerConfig, TallyScope};
use http::{HttpState, serve_http};
use protocol::{ClientEvent, ServerEvent};
use reports::RunReport;
use session::{SessionContext, serve_live, xlsx_factory};
use workbook::{ArtifactRegistry, XlsxExporter, artifact_file_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Serve live sessions and downloads until interrupted
    Serve,
    /// Run one loop offline and print a summary
    Batch,
    /// Connect to a running server and follow one session
    Watch,
}

#[derive(Debug, Parser)]
#[command(name = "wheeltally-server", version)]
#[command(about = "Roulette sampling sessions with live progress and workbook export")]
struct Args {
    /// Run mode: serve (network), batch (offline), or watch (client)
    #[arg(long, value_enum, default_value_t = RunMode::Serve)]
    mode: RunMode,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address for the download server
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Address for live sessions
    #[arg(long)]
    live_addr: Option<SocketAddr>,

    /// Milliseconds between ticks
    #[arg(long)]
    interval_ms: Option<i64>,

    /// Directory receiving exported workbooks
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Share one tally across sessions or give each its own
    #[arg(long, value_enum)]
    scope: Option<TallyScope>,

    /// Seed for reproducible spins
    #[arg(long)]
    seed: Option<u64>,

    /// Number of ticks to request (batch and watch modes)
    #[arg(long, default_value_t = 10, allow_hyphen_values = true)]
    ticks: i64,

    /// Live server to follow in watch mode
    #[arg(long, default_value = "127.0.0.1:4001")]
    connect: String,

    /// Output report format (batch mode)
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console"])]
    report: String,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = resolve_config(&args)?;

    match args.mode {
        RunMode::Serve => {
            announce_banner();
            run_serve(config).await
        }
        RunMode::Batch => {
            let report = run_batch(&args, &config)?;
            write_report(&args, &report)
        }
        RunMode::Watch => {
            let ticks = run_watch(&args).await?;
            log::info!("watched session finished after {ticks} progress events");
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

fn announce_banner() {
    println!("{}", "🎰 Wheel Tally Server".bright_cyan().bold());
    println!("{}", "=====================".cyan());
}

/// File settings first, command-line flags on top.
fn resolve_config(args: &Args) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.http_addr = addr;
    }
    if let Some(addr) = args.live_addr {
        config.live_addr = addr;
    }
    if let Some(ms) = args.interval_ms {
        config.tick_interval_ms = ms;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir.clone_from(dir);
    }
    if let Some(scope) = args.scope {
        config.scope = scope;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run_serve(config: ServerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    let registry = Arc::new(ArtifactRegistry::discover(&config.output_dir));
    let http_state = Arc::new(HttpState {
        landing_page: config.landing_page.clone(),
        registry: Arc::clone(&registry),
    });
    let live = TcpListener::bind(config.live_addr)
        .await
        .with_context(|| format!("failed to bind live listener on {}", config.live_addr))?;
    log::info!("live sessions on {}", config.live_addr);
    log::info!(
        "ticks every {}ms, tally scope {:?}",
        config.tick_interval_ms,
        config.scope
    );

    let http_addr = config.http_addr;
    let exporters = xlsx_factory(&config, registry);
    let ctx = Arc::new(SessionContext::new(
        config,
        ticker::interval_factory(),
        exporters,
    ));
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
        log::info!("shutting down");
    };

    tokio::select! {
        res = serve_http(http_addr, http_state, shutdown) => {
            res.with_context(|| format!("download server on {http_addr} failed"))?;
        }
        res = serve_live(live, ctx) => {
            res.context("live listener failed")?;
        }
    }
    Ok(())
}

fn run_batch(args: &Args, config: &ServerConfig) -> Result<RunReport> {
    let started = Instant::now();
    let mut sampler = SamplingLoop::start(args.ticks, config.tick_interval_ms)
        .context("invalid batch parameters")?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let registry = Arc::new(ArtifactRegistry::new());
    let path = config
        .output_dir
        .join(artifact_file_name(&config.file_prefix, "batch", Local::now()));
    let exporter = XlsxExporter::new(path, config.sheet_name.clone(), Arc::clone(&registry));
    let mut rng = config
        .seed
        .map_or_else(WheelRng::from_entropy, |seed| WheelRng::for_session(seed, 0));
    let mut tally = Tally::new();
    let mut export_failures = 0;

    while let Some(step) = sampler.step(&mut rng, &mut tally, &exporter) {
        if step.export.is_err() {
            export_failures += 1;
        }
        if args.verbose {
            println!(
                "🎲 [{}/{}] {} {}",
                step.record.tick,
                sampler.tick_limit(),
                step.record.outcome,
                step.record.classification.color
            );
        }
    }

    tally
        .check_invariants()
        .context("tally invariants broken after batch run")?;
    Ok(RunReport::new(
        sampler.ticks_completed(),
        config.seed,
        registry.latest(),
        export_failures,
        started.elapsed(),
        tally.snapshot(),
    ))
}

/// Follow one session on a running server; returns the progress events seen.
async fn run_watch(args: &Args) -> Result<u32> {
    let stream = TcpStream::connect(&args.connect)
        .await
        .with_context(|| format!("failed to connect to {}", args.connect))?;
    let (read, mut write) = stream.into_split();
    let mut request = serde_json::to_vec(&ClientEvent::StartRequest(args.ticks))?;
    request.push(b'\n');
    write.write_all(&request).await?;

    let mut lines = BufReader::new(read).lines();
    let mut progress_seen = 0;
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<ServerEvent>(&line) {
            Ok(ServerEvent::Info(text)) => println!("ℹ️  {text}"),
            Ok(ServerEvent::Progress(p)) => {
                progress_seen += 1;
                println!("🎲 [{}/{}] {} {}", p.tick, p.tick_limit, p.outcome, p.color);
            }
            Ok(ServerEvent::Completed(marker)) => {
                println!("{} {marker}", "✅".green());
                return Ok(progress_seen);
            }
            Ok(ServerEvent::Error(message)) => bail!("server reported: {message}"),
            Err(err) => log::warn!("ignoring unreadable event {line:?}: {err}"),
        }
    }
    bail!("connection closed before the session completed")
}

fn write_report(args: &Args, report: &RunReport) -> Result<()> {
    let mut out = report_writer(args.output.as_deref())?;
    match args.report.as_str() {
        "json" => reports::generate_json_report(&mut out, report)?,
        "markdown" => reports::generate_markdown_report(&mut out, report)?,
        _ => reports::generate_console_report(&mut out, report)?,
    }
    out.flush()?;
    Ok(())
}

/// Report destination: the `--output` file when given, stdout otherwise.
fn report_writer(path: Option<&Path>) -> Result<Box<dyn Write>> {
    let Some(path) = path else {
        return Ok(Box::new(stdout().lock()));
    };
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}
