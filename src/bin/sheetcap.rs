//! CLI binary for sheetcap.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CaptureConfig`, feeds text into the pipeline and writes
//! captures into a directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sheetcap::pipeline::encode::encode_png;
use sheetcap::{
    auto_crop, CaptureConfig, CaptureOutcome, CapturePipeline, CaptureProgressCallback,
    CaptureRequest, DirectorySink, ProgressCallback, Session, Stage, TriggerCategory,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
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

/// Terminal progress callback: one spinner whose message follows the
/// current stage, plus a log line per finished or failed capture.
struct CliProgressCallback {
    bar: ProgressBar,
    started: std::sync::Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Idle");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: std::sync::Mutex::new(None),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|g| g.map(|t| t.elapsed().as_secs_f64()))
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl CaptureProgressCallback for CliProgressCallback {
    fn on_capture_start(&self, category: TriggerCategory) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Capturing {}…", category.label()))
        ));
        self.bar.set_prefix("Capturing");
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_failed(&self, stage: Stage, error: &str) {
        // Keep long error bodies to one terminal line.
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            stage,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.set_prefix("Idle");
        self.bar.set_message("");
    }

    fn on_capture_complete(&self, width: u32, height: u32, bytes: usize) {
        self.bar.println(format!(
            "  {} {}x{} px  {}  {}",
            green("✓"),
            width,
            height,
            dim(&format!("{bytes} bytes")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.set_prefix("Idle");
        self.bar.set_message("");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Capture one deck code into ./captures
  sheetcap capture KCG-ABCDEF

  # Feed messages line by line (one capture per qualifying line)
  tail -f messages.log | sheetcap listen --out-dir shots

  # Check how a message would be classified (no network)
  sheetcap classify 'KCG-ABCDEF'

  # Trim the white margin off an existing image
  sheetcap crop page.png -o page-cropped.png

  # Run as a Discord bot (build with --features discord)
  DISCORD_TOKEN=... sheetcap discord

TRIGGERS:
  Code form   text starting with "KCG-"           label: デッキコード
  List form   text with exactly 59 '/' characters  label: デッキリスト
  Anything else is ignored without a reply.

ENVIRONMENT VARIABLES:
  GOOGLE_SHEETS_CREDENTIALS   Service-account JSON key (the key itself, not a path)
  GOOGLE_OAUTH_ACCESS_TOKEN   Pre-issued bearer token, used when no key is set
  SPREADSHEET_ID              Target spreadsheet
  DISCORD_TOKEN               Bot token for `sheetcap discord`
  PDFIUM_LIB_PATH             Path to libpdfium (file or directory)
  RUST_LOG                    Overrides the log filter

  Without credentials or a spreadsheet id every trigger is answered with a
  configuration error instead of a capture.
"#;

/// Capture a spreadsheet region after writing a chat trigger into it.
#[derive(Parser, Debug)]
#[command(
    name = "sheetcap",
    version,
    about = "Write chat triggers into a Google Sheet and reply with a cropped PNG of the result",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Worksheet that receives the writes and is exported.
    #[arg(long, global = true, env = "SHEETCAP_WORKSHEET")]
    worksheet: Option<String>,

    /// A1 cell for the category label.
    #[arg(long, global = true, env = "SHEETCAP_LABEL_CELL")]
    label_cell: Option<String>,

    /// A1 cell for the message text.
    #[arg(long, global = true, env = "SHEETCAP_CONTENT_CELL")]
    content_cell: Option<String>,

    /// A1 range to export (e.g. A1:H12).
    #[arg(long, global = true, env = "SHEETCAP_RANGE")]
    range: Option<String>,

    /// Wait between the writes and the export, in milliseconds.
    #[arg(long, global = true, env = "SHEETCAP_SETTLE_MS")]
    settle_ms: Option<u64>,

    /// Rasterisation DPI (72–600).
    #[arg(long, global = true, env = "SHEETCAP_DPI",
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Export download timeout in seconds.
    #[arg(long, global = true, env = "SHEETCAP_EXPORT_TIMEOUT")]
    export_timeout: Option<u64>,

    /// Deliver the rendered page without trimming its margin.
    #[arg(long, global = true, env = "SHEETCAP_NO_AUTOCROP")]
    no_autocrop: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "SHEETCAP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SHEETCAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SHEETCAP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one message through the pipeline.
    Capture {
        /// Message text.
        text: String,

        /// Directory that receives the PNG.
        #[arg(long, env = "SHEETCAP_OUT_DIR", default_value = "captures")]
        out_dir: PathBuf,
    },

    /// Read messages from stdin, one per line, until EOF.
    Listen {
        /// Directory that receives the PNGs.
        #[arg(long, env = "SHEETCAP_OUT_DIR", default_value = "captures")]
        out_dir: PathBuf,
    },

    /// Print how a message would be classified.
    Classify {
        /// Message text.
        text: String,
    },

    /// Trim the white margin off an image file.
    Crop {
        /// Input image (PNG or JPEG).
        input: PathBuf,

        /// Output PNG path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Connect to Discord and answer triggers in channels.
    #[cfg(feature = "discord")]
    Discord {
        /// Bot token.
        #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback that matters; keep INFO logs out of
    // its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let config = build_config(&cli)?;

    match &cli.command {
        Command::Classify { text } => {
            match config.trigger.classify(text) {
                Some(category) => println!("{:?} ({})", category, category.label()),
                None => println!("not a trigger"),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Crop { input, output } => {
            crop_file(input, output)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Capture { text, out_dir } => {
            let (pipeline, session, progress) = build_pipeline(config, show_progress);
            let sink = DirectorySink::new(out_dir);
            let outcome = pipeline
                .handle(&CaptureRequest::new(text.as_str(), "argv"), &sink)
                .await;
            finish(progress, session).await;

            match outcome {
                CaptureOutcome::Delivered { .. } => {
                    if !cli.quiet {
                        if let Some(path) = sink.last_written() {
                            eprintln!("{}  {}", green("✔"), bold(&path.display().to_string()));
                        }
                    }
                    Ok(ExitCode::SUCCESS)
                }
                CaptureOutcome::Ignored => {
                    if !cli.quiet {
                        eprintln!("{}", dim("Not a trigger; nothing to do."));
                    }
                    Ok(ExitCode::SUCCESS)
                }
                CaptureOutcome::Failed { .. } => Ok(ExitCode::FAILURE),
            }
        }

        Command::Listen { out_dir } => {
            let (pipeline, session, progress) = build_pipeline(config, show_progress);
            let pipeline = Arc::new(pipeline);
            let sink = Arc::new(DirectorySink::new(out_dir));

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut runs = Vec::new();
            let mut line_no = 0usize;
            while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
                line_no += 1;
                let pipeline = Arc::clone(&pipeline);
                let sink = Arc::clone(&sink);
                runs.push(tokio::spawn(async move {
                    let request = CaptureRequest::new(line, format!("stdin:{line_no}"));
                    pipeline.handle(&request, sink.as_ref()).await
                }));
            }

            let outcomes = futures::future::join_all(runs).await;
            finish(progress, session).await;

            let (mut delivered, mut failed) = (0usize, 0usize);
            for outcome in outcomes {
                match outcome.context("Capture task panicked")? {
                    CaptureOutcome::Delivered { .. } => delivered += 1,
                    CaptureOutcome::Failed { .. } => failed += 1,
                    CaptureOutcome::Ignored => {}
                }
            }
            if !cli.quiet {
                eprintln!(
                    "{}  {} delivered  /  {} failed  {}",
                    if failed == 0 { green("✔") } else { cyan("⚠") },
                    bold(&delivered.to_string()),
                    red(&failed.to_string()),
                    dim(&format!("({line_no} lines)")),
                );
            }
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        #[cfg(feature = "discord")]
        Command::Discord { token } => {
            // The spinner would fight with a long-running log stream.
            let (pipeline, session, _) = build_pipeline(config, false);
            let result = sheetcap::discord::run_bot(token, Arc::new(pipeline)).await;
            if let Some(session) = session {
                session.shutdown().await;
            }
            result.context("Discord transport stopped")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Map CLI args to `CaptureConfig`.
fn build_config(cli: &Cli) -> Result<CaptureConfig> {
    let mut builder = CaptureConfig::builder().autocrop(!cli.no_autocrop);

    if let Some(ref name) = cli.worksheet {
        builder = builder.worksheet(name.as_str());
    }
    if let Some(ref cell) = cli.label_cell {
        builder = builder.label_cell(cell.as_str());
    }
    if let Some(ref cell) = cli.content_cell {
        builder = builder.content_cell(cell.as_str());
    }
    if let Some(ref range) = cli.range {
        builder = builder.capture_range(range.as_str());
    }
    if let Some(ms) = cli.settle_ms {
        builder = builder.settle_delay(Duration::from_millis(ms));
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(secs) = cli.export_timeout {
        builder = builder.export_timeout_secs(secs);
    }

    builder.build().context("Invalid configuration")
}

/// Build the pipeline from the environment, attaching the spinner if wanted.
fn build_pipeline(
    config: CaptureConfig,
    show_progress: bool,
) -> (CapturePipeline, Option<Arc<Session>>, Option<Arc<CliProgressCallback>>) {
    let (pipeline, session) = CapturePipeline::from_env(config);
    if !show_progress {
        return (pipeline, session, None);
    }
    let cb = CliProgressCallback::new();
    let pipeline = pipeline.with_progress(Arc::clone(&cb) as ProgressCallback);
    (pipeline, session, Some(cb))
}

async fn finish(progress: Option<Arc<CliProgressCallback>>, session: Option<Arc<Session>>) {
    if let Some(cb) = progress {
        cb.finish();
    }
    if let Some(session) = session {
        session.shutdown().await;
    }
}

/// `sheetcap crop`: auto-crop a local image and write it as PNG.
fn crop_file(input: &Path, output: &Path) -> Result<()> {
    let img = image::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let (cropped, bounds) = auto_crop(&img);
    let png = encode_png(&cropped).context("Failed to encode PNG")?;

    let tmp = output.with_extension("png.tmp");
    std::fs::write(&tmp, &png).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, output)
        .with_context(|| format!("Failed to move output into {}", output.display()))?;

    match bounds {
        Some(b) => eprintln!(
            "{}  {}x{} → {}x{}  {}",
            green("✔"),
            img.width(),
            img.height(),
            b.width(),
            b.height(),
            bold(&output.display().to_string()),
        ),
        None => eprintln!(
            "{}  nothing to trim  {}",
            cyan("⚠"),
            bold(&output.display().to_string()),
        ),
    }
    Ok(())
}
