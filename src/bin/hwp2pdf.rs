//! CLI binary for edgequake-hwp2pdf.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `convert` pushes local files or URLs through the same worker pool
//! in-process, and `doctor` checks the external toolchain.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_hwp2pdf::pipeline::input::resolve_input;
use edgequake_hwp2pdf::{
    server, BatchState, ConversionProgressCallback, ConversionService, DedupPolicy, JobState,
    PageSize, ProgressCallback, ServiceConfig,
};
use hwp_toolchain::{locate, probe_version, ALL_TOOLS};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a log line per
/// finished file. Files finish out of order when several workers run.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, filename: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(filename))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, _session: &str, total_jobs: usize) {
        self.bar.set_length(total_jobs as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_jobs} file(s)…"))
        ));
    }

    fn on_job_start(&self, filename: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(filename.to_string(), Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_job_complete(&self, filename: &str, cached: bool) {
        let secs = self.elapsed_secs(filename);
        let note = if cached { "cached" } else { "converted" };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            green("✓"),
            filename,
            dim(note),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, filename: &str, error: &str) {
        let secs = self.elapsed_secs(filename);
        // Keep long tool output on one line.
        let first_line = error.lines().next().unwrap_or_default();
        let msg: String = if first_line.chars().count() > 80 {
            first_line.chars().take(79).chain(['…']).collect()
        } else {
            first_line.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            filename,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _session: &str, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} file(s) converted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                succeeded + failed,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 8000
  hwp2pdf serve --bind 0.0.0.0:8000

  # Convert files into ./pdf
  hwp2pdf convert report.hwp minutes.hwp -o pdf

  # Convert from a URL, A4 pages, two retries per file
  hwp2pdf convert https://example.com/report.hwp --page-size a4 --max-retries 2

  # Check that hwp5html and weasyprint are installed
  hwp2pdf doctor

HTTP ENDPOINTS (serve):
  POST /convert                           multipart upload, one or more .hwp files
  GET  /conversion-status/{session_id}    batch status
  GET  /files                             every stored artifact
  GET  /files/{session_id}                artifacts of one session
  GET  /files/{session_id}/{filename}     download a PDF
  GET  /view/{session_id}/{filename}      view a PDF inline
  GET  /artifacts/{fingerprint}           content-addressed PDF
  GET  /health                            liveness

ENVIRONMENT VARIABLES:
  HWP5HTML_PATH       Path to the hwp5html executable
  WEASYPRINT_PATH     Path to the weasyprint executable
  RUST_LOG            Override log filter (e.g. edgequake_hwp2pdf=debug)

SETUP:
  pip install pyhwp weasyprint
"#;

/// Convert HWP documents to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "hwp2pdf",
    version,
    about = "Convert HWP documents to PDF, one-shot or as an HTTP service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "HWP2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "HWP2PDF_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP conversion service.
    Serve(ServeArgs),
    /// Convert local files or URLs and write the PDFs to a directory.
    Convert(ConvertArgs),
    /// Report whether the external converters are installed.
    Doctor,
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Number of concurrent conversions.
    #[arg(short, long, env = "HWP2PDF_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Jobs buffered ahead of the workers.
    #[arg(long, env = "HWP2PDF_QUEUE_CAPACITY", default_value_t = 64)]
    queue_capacity: usize,

    /// Root for per-job scratch directories.
    #[arg(long, env = "HWP2PDF_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Durable artifact store.
    #[arg(long, env = "HWP2PDF_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Artifact keying: content (shared by fingerprint) or session.
    #[arg(long, env = "HWP2PDF_DEDUP", default_value = "content", value_parser = parse_dedup)]
    dedup: DedupPolicy,

    /// Page size for the rendered PDF: letter, a4, legal, or any CSS size.
    #[arg(long, env = "HWP2PDF_PAGE_SIZE", default_value = "letter", value_parser = parse_page_size)]
    page_size: PageSize,

    /// Wall-clock limit for each external tool run, in seconds.
    #[arg(long, env = "HWP2PDF_STAGE_TIMEOUT", default_value_t = 120)]
    stage_timeout: u64,

    /// Retries per file after a failed conversion.
    #[arg(long, env = "HWP2PDF_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Base delay between retries (doubles each attempt), in ms.
    #[arg(long, env = "HWP2PDF_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// hwp5html executable (name or path).
    #[arg(long, env = "HWP2PDF_HWP5HTML")]
    hwp5html: Option<PathBuf>,

    /// weasyprint executable (name or path).
    #[arg(long, env = "HWP2PDF_WEASYPRINT")]
    weasyprint: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "HWP2PDF_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Forget finished sessions after this many seconds (0 keeps them).
    #[arg(long, env = "HWP2PDF_SESSION_TTL", default_value_t = 86_400)]
    session_ttl: u64,

    /// Maximum request body size in MiB.
    #[arg(long, env = "HWP2PDF_MAX_UPLOAD_MB", default_value_t = 64)]
    max_upload_mb: usize,

    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local .hwp paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory the PDFs are written to.
    #[arg(short, long, env = "HWP2PDF_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "HWP2PDF_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the final batch status as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "HWP2PDF_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

fn parse_dedup(s: &str) -> Result<DedupPolicy, String> {
    s.parse().map_err(|e: edgequake_hwp2pdf::Hwp2PdfError| e.to_string())
}

fn parse_page_size(s: &str) -> Result<PageSize, String> {
    s.parse().map_err(|e: edgequake_hwp2pdf::Hwp2PdfError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during a one-shot conversion.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Convert(args) => convert(args, show_progress, cli.quiet).await,
        Command::Doctor => doctor(),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let ttl = (args.session_ttl > 0).then_some(args.session_ttl);
    let max_upload = args.max_upload_mb.saturating_mul(1024 * 1024);
    let config = build_config(&args.service, None, ttl, Some(max_upload))?;

    let service = Arc::new(
        ConversionService::with_external_tools(config).context("Failed to start service")?,
    );
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    server::serve(listener, service, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested, draining workers");
    })
    .await
    .context("HTTP server failed")?;
    Ok(())
}

async fn convert(args: ConvertArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let mut uploads = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let upload = resolve_input(input, args.download_timeout)
            .await
            .with_context(|| format!("Failed to read {input}"))?;
        uploads.push(upload);
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args.service, progress, None, None)?;

    // Generous upper bound: every file may use every attempt of both stages.
    let attempts = u64::from(config.max_retries) + 1;
    let deadline = Duration::from_secs(
        config
            .stage_timeout_secs
            .saturating_mul(2 * attempts)
            .saturating_mul(uploads.len() as u64)
            .saturating_add(60),
    );

    let service =
        ConversionService::with_external_tools(config).context("Failed to start converter")?;
    let session = service.submit(uploads).await.context("Batch rejected")?;
    let status = service.wait_for(&session, deadline).await?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    for job in status.jobs.iter().filter(|j| j.state != JobState::Failed) {
        let artifact = service.artifact(&session, &job.artifact_name).await?;
        let dest = args.out_dir.join(&artifact.name);
        tokio::fs::write(&dest, &artifact.bytes)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        if !quiet && !show_progress && !args.json {
            eprintln!("{} {} → {}", green("✓"), job.filename, dest.display());
        }
    }

    service.shutdown().await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialise status")?
        );
    } else if !quiet && !show_progress {
        for failed in &status.failed {
            eprintln!("{} {}: {}", red("✗"), failed.filename, failed.error);
        }
    }

    if status.status == BatchState::Error {
        bail!(
            "{}",
            status.message.unwrap_or_else(|| "Conversion failed".to_string())
        );
    }
    Ok(())
}

fn doctor() -> Result<()> {
    let mut missing = 0;
    for tool in ALL_TOOLS {
        match locate(&tool, None) {
            Ok(path) => {
                let version = probe_version(&path).unwrap_or_else(|e| red(&e.to_string()));
                println!(
                    "{} {:<12} {}  {}",
                    green("✓"),
                    tool.program,
                    path.display(),
                    dim(&version)
                );
            }
            Err(e) => {
                missing += 1;
                println!("{} {:<12} {}", red("✗"), tool.program, e);
            }
        }
    }

    let defaults = ServiceConfig::default();
    println!("  scratch root  {}", defaults.scratch_root.display());
    println!("  output root   {}", defaults.output_root.display());

    if missing > 0 {
        bail!("{missing} required tool(s) missing");
    }
    Ok(())
}

/// Map shared CLI args to a `ServiceConfig`.
fn build_config(
    args: &ServiceArgs,
    progress: Option<ProgressCallback>,
    session_ttl_secs: Option<u64>,
    max_upload_bytes: Option<usize>,
) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .session_ttl_secs(session_ttl_secs)
        .workers(args.workers)
        .queue_capacity(args.queue_capacity)
        .dedup(args.dedup)
        .page_size(args.page_size.clone())
        .stage_timeout_secs(args.stage_timeout)
        .max_retries(args.max_retries)
        .retry_backoff_ms(args.retry_backoff_ms);

    if let Some(dir) = &args.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    if let Some(dir) = &args.store_dir {
        builder = builder.output_root(dir);
    }
    if let Some(program) = &args.hwp5html {
        builder = builder.stage_one_program(program);
    }
    if let Some(program) = &args.weasyprint {
        builder = builder.stage_two_program(program);
    }
    if let Some(bytes) = max_upload_bytes {
        builder = builder.max_upload_bytes(bytes);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
