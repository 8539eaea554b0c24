//! objectai - live object-detection overlay
//!
//! Runs the detection/render loop against a camera and takes commands on
//! stdin (`start`, `stop`, `threshold 60%`, `mode server`, `snapshot`,
//! `status`, `quit`). The status line is refreshed on stderr.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, never, select, unbounded, Receiver};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use objectai::control::{self, Command, Reply};
use objectai::ui::Ui;
use objectai::{BackendMode, BackendReadiness, OverlayConfig, Session, TickOutcome};

/// Longest sleep between pumps, so commands and status stay responsive.
const MAX_WAIT: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about = "Live object-detection overlay on a camera feed")]
struct Args {
    /// Camera URI (`stub://name` or a device path such as /dev/video0).
    #[arg(long)]
    camera: Option<String>,
    /// Backend mode: client (in-process) or server (remote).
    #[arg(long)]
    mode: Option<BackendMode>,
    /// Confidence threshold, 0..1.
    #[arg(long)]
    threshold: Option<f32>,
    /// ONNX model for in-process detection.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Class labels for the model, one per line.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Replay detections from a JSON script instead of running a model.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Remote detection endpoint used in server mode.
    #[arg(long)]
    remote_url: Option<String>,
    /// Do not post detections to the log sink.
    #[arg(long)]
    no_telemetry: bool,
    /// Start the camera immediately.
    #[arg(long)]
    start: bool,
    /// Exit after this many seconds.
    #[arg(long)]
    run_for: Option<u64>,
    /// Status refresh interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    status_interval_ms: u64,
    /// Output style: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

impl Args {
    fn apply(&self, cfg: &mut OverlayConfig) {
        if let Some(camera) = &self.camera {
            cfg.capture.device = camera.clone();
        }
        if let Some(mode) = self.mode {
            cfg.detector.mode = mode;
        }
        if let Some(threshold) = self.threshold {
            cfg.session.threshold = threshold;
        }
        if let Some(model) = &self.model {
            cfg.detector.model_path = Some(model.clone());
        }
        if let Some(labels) = &self.labels {
            cfg.detector.labels_path = Some(labels.clone());
        }
        if let Some(script) = &self.script {
            cfg.detector.script_path = Some(script.clone());
        }
        if let Some(url) = &self.remote_url {
            cfg.detector.remote_url = url.clone();
        }
        if self.no_telemetry {
            cfg.telemetry.enabled = false;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = OverlayConfig::load()?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let dumb_term = std::env::var("TERM").is_ok_and(|term| term == "dumb");
    let ui = Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal(), dumb_term);
    let mut session = Session::from_config(&cfg)?;
    let mut loading = match session.readiness() {
        BackendReadiness::NotReady => Some(ui.stage("Preparing the vision model")),
        _ => None,
    };

    if args.start {
        if let Err(err) = session.start() {
            log::error!("{}", err);
        }
    }

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let mut commands = Some(spawn_stdin_reader()?);
    let deadline = args.run_for.map(|secs| Instant::now() + Duration::from_secs(secs));
    let status_every = Duration::from_millis(args.status_interval_ms.max(50));
    let mut last_status: Option<Instant> = None;
    let mut status = ui.status_line();

    'run: loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run time elapsed");
            break;
        }

        if let Some(outcome) = session.pump() {
            match outcome {
                TickOutcome::Halted(message) => status.println(&message),
                other => log::trace!("tick: {:?}", other),
            }
        }

        if loading.is_some() {
            match session.readiness() {
                BackendReadiness::NotReady => {}
                BackendReadiness::Ready => loading = None,
                BackendReadiness::LoadFailed(reason) => {
                    if let Some(stage) = loading.take() {
                        stage.fail(reason);
                    }
                    status.println(session.readiness().advisory());
                }
            }
        }

        if last_status.map_or(true, |at| at.elapsed() >= status_every) {
            status.update(&session.status().summary_line());
            last_status = Some(Instant::now());
        }

        let wait = wait_for_next_tick(&session);
        let command_rx = commands.clone().unwrap_or_else(never);
        select! {
            recv(stop_rx) -> _ => {
                log::info!("shutdown signal received");
                break 'run;
            }
            recv(command_rx) -> line => match line {
                Ok(line) => {
                    if handle_line(&mut session, &cfg, &line, &status) {
                        break 'run;
                    }
                    last_status = None;
                }
                Err(_) => {
                    log::debug!("stdin closed; commands disabled");
                    commands = None;
                }
            },
            default(wait) => {}
        }
    }

    session.stop();
    status.finish();
    Ok(())
}

/// Returns true when the user asked to quit.
fn handle_line(
    session: &mut Session,
    cfg: &OverlayConfig,
    line: &str,
    status: &objectai::ui::StatusLine,
) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(err) => {
            status.println(&format!("{:#}", err));
            return false;
        }
    };
    match control::execute(session, &cfg.detector, command) {
        Ok(Reply::Quit) => true,
        Ok(Reply::Message(message)) => {
            status.println(&message);
            false
        }
        Err(err) => {
            status.println(&format!("{:#}", err));
            false
        }
    }
}

fn wait_for_next_tick(session: &Session) -> Duration {
    match session.next_deadline() {
        Some(due) => {
            let remaining = (due - session.now_ms()).max(0.0);
            Duration::from_secs_f64(remaining / 1000.0).min(MAX_WAIT)
        }
        None => MAX_WAIT,
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::debug!("stdin read failed: {}", err);
                        break;
                    }
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}
