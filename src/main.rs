//! Screen Translator - live OCR and translation of on-screen text
//!
//! Watches rectangular regions of a game window, reads any new text with a
//! pluggable OCR engine and shows its translation.

mod app;
mod capture;
mod config;
mod display;
mod ollama;
mod pipeline;
mod translation;
mod vision;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, never, select, Receiver};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::TranslatorApp;
use crate::capture::{list_window_titles, ScreenRect, WindowSource};
use crate::config::Preferences;
use crate::display::DisplayEvent;
use crate::pipeline::CycleOutcome;
use crate::translation::{LlmTranslator, TranslationService};
use crate::vision::{param_specs, EngineId, ParamSpec, StepType};

/// Screen Translator - OCR and translate regions of a game window
#[derive(Parser, Debug)]
#[command(name = "screen-translator")]
#[command(about = "Capture screen regions, read their text and translate it")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate regions of a window (default)
    Run(RunArgs),
    /// List capturable window titles and exit
    ListWindows,
    /// List preprocessing steps and their parameters and exit
    Steps,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Target window title (partial match)
    #[arg(short, long)]
    window: Option<String>,

    /// Screen region as x,y,width,height; repeat for more regions
    #[arg(short, long = "region")]
    regions: Vec<ScreenRect>,

    /// Milliseconds between pipeline cycles
    #[arg(short, long)]
    interval: Option<u64>,

    /// OCR engine id (lightweight or vlm)
    #[arg(short, long)]
    engine: Option<String>,

    /// Run a single cycle, print the results and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::ListWindows => list_windows(),
        Command::Steps => {
            print_steps();
            Ok(())
        }
        Command::Run(args) => run(cli.config, args),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")?;
    Ok(())
}

fn list_windows() -> Result<()> {
    let titles = list_window_titles().context("Failed to enumerate windows")?;
    println!("Capturable windows:");
    if titles.is_empty() {
        println!("  No windows found");
    }
    for title in titles {
        println!("  {title}");
    }
    Ok(())
}

fn print_steps() {
    for step_type in StepType::ALL {
        println!("{} ({})", step_type.config_name(), step_type.label());
        for spec in param_specs(step_type) {
            println!("  {}", describe_param(spec));
        }
    }
}

fn describe_param(spec: &ParamSpec) -> String {
    let mut line = format!(
        "{:<16} {:<24} {:<6} default={}",
        spec.name,
        spec.label,
        spec.kind,
        spec.default_value()
    );
    if let (Some(min), Some(max)) = (spec.min, spec.max) {
        line.push_str(&format!(" range={min}..={max}"));
    }
    if !spec.choices.is_empty() {
        line.push_str(&format!(" choices={}", spec.choices.join("|")));
    }
    if !spec.tooltip.is_empty() {
        line.push_str(&format!("  # {}", spec.tooltip));
    }
    line
}

fn run(config_path: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let mut prefs = Preferences::open(&config_path);

    if let Some(window) = &args.window {
        prefs
            .update(|c| c.capture.target_window = Some(window.clone()))
            .context("Failed to save target window")?;
    }
    let Some(window) = prefs.config().capture.target_window.clone() else {
        bail!("No target window; pass --window or set capture.target_window in {config_path:?}");
    };
    if args.regions.is_empty() {
        bail!("No regions given; pass --region x,y,width,height");
    }

    let translator = LlmTranslator::new(&prefs.config().translation)
        .context("Failed to set up translation backend")?;

    let mut app = TranslatorApp::new(prefs);
    if let Some(engine) = &args.engine {
        app.set_active_engine(&EngineId::from(engine.as_str()))?;
    }
    if let Some(interval) = args.interval {
        app.set_interval(interval)?;
    }
    for engine in app.available_engines() {
        info!(
            "Engine {}: {}{}",
            engine.id,
            engine.name,
            if engine.requires_specialized_hardware { " (GPU)" } else { "" }
        );
    }

    let orchestrator = app.build_orchestrator(
        Box::new(WindowSource::new(window)),
        TranslationService::new(Box::new(translator)),
    );

    if args.once {
        return run_once(&app, orchestrator, &args.regions);
    }

    app.start(orchestrator)?;
    for rect in &args.regions {
        let id = app.add_region(*rect)?;
        info!("Watching region {} at {}", id, rect);
    }

    let interrupt = ctrl_c_channel()?;
    info!("Screen Translator running (Ctrl+C to exit)");
    match forward_display_events(&app, interrupt) {
        Exit::Interrupted => info!("Interrupted, shutting down"),
        Exit::PipelineStopped => warn!("Pipeline thread stopped"),
    }

    app.stop()
}

/// Why [`forward_display_events`] returned
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Interrupted,
    PipelineStopped,
}

/// Fires once when the process receives Ctrl+C
fn ctrl_c_channel() -> Result<Receiver<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    let (tx, rx) = bounded(1);

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => warn!("Ctrl+C handler unavailable: {}", e),
        })
        .context("Failed to spawn signal thread")?;

    Ok(rx)
}

/// Log display events until `interrupt` fires or the pipeline thread dies
fn forward_display_events(app: &TranslatorApp, interrupt: Receiver<()>) -> Exit {
    let mut interrupt = Some(interrupt);
    while app.is_running() {
        let signal = interrupt.clone().unwrap_or_else(never);
        select! {
            recv(signal) -> msg => match msg {
                Ok(()) => return Exit::Interrupted,
                Err(_) => interrupt = None,
            },
            recv(app.display_events()) -> event => match event {
                Ok(DisplayEvent::Text { region, text }) => info!("[{}] {}", region, text),
                Ok(DisplayEvent::Closed { region }) => info!("Region {} closed", region),
                Err(_) => break,
            },
            default(Duration::from_millis(500)) => {}
        }
    }
    Exit::PipelineStopped
}

fn run_once(
    app: &TranslatorApp,
    mut orchestrator: pipeline::PipelineOrchestrator,
    regions: &[ScreenRect],
) -> Result<()> {
    for rect in regions {
        orchestrator
            .regions_mut()
            .add_with(*rect, |id| app.sink_for(id))?;
    }

    if let CycleOutcome::Idle(reason) = orchestrator.run_cycle() {
        warn!("Nothing processed: {:?}", reason);
    }

    for event in app.display_events().try_iter() {
        if let DisplayEvent::Text { region, text } = event {
            println!("[{region}] {text}");
        }
    }

    orchestrator.shutdown();
    Ok(())
}
