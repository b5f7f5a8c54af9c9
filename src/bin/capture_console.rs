//! capture_console - operator console for the depth capture kernel
//!
//! This binary:
//! 1. Loads configuration (CAPTURE_CONFIG file, environment, CLI flags)
//! 2. Builds a session on the configured device driver
//! 3. Reads operator commands from stdin and services them every 20 ms
//! 4. Prints the status line whenever it changes
//! 5. Stops the session on quit, Ctrl-C or end of input
//!
//! Commands: `s` `p` `r` `d` `l` `q` (or `esc`), `click X Y`, `snap [PATH]`,
//! `status`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use depth_capture::{
    action_for_key, compose_panel, driver_for, hit_test, save::batch_stamp, Action,
    CaptureConfig, Flow, Session,
};

const DISPLAY_CADENCE: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator console for a multi-stream depth camera")]
struct Args {
    /// Device URL (stub://<name> for the synthetic device).
    #[arg(long)]
    device: Option<String>,

    /// Root folder for continuously saved images.
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Acquisition tick period in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Minimum milliseconds between save batches.
    #[arg(long)]
    save_interval_ms: Option<u64>,

    /// Start acquisition immediately.
    #[arg(long, env = "CAPTURE_AUTOSTART")]
    autostart: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Action(Action),
    Snap(Option<PathBuf>),
    Status,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let command = match head {
        "click" => {
            let x: i32 = words
                .next()
                .ok_or_else(|| anyhow!("click needs X and Y"))?
                .parse()
                .context("click X must be an integer")?;
            let y: i32 = words
                .next()
                .ok_or_else(|| anyhow!("click needs X and Y"))?
                .parse()
                .context("click Y must be an integer")?;
            match hit_test(x, y) {
                Some(action) => Command::Action(action),
                None => return Ok(None),
            }
        }
        "snap" => Command::Snap(words.next().map(PathBuf::from)),
        "status" => Command::Status,
        "esc" => Command::Action(Action::Quit),
        key => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => match action_for_key(c) {
                    Some(action) => Command::Action(action),
                    None => return Err(anyhow!("unbound key '{}'", c)),
                },
                _ => return Err(anyhow!("unknown command '{}'", key)),
            }
        }
    };
    Ok(Some(command))
}

fn snap(session: &Session, path: Option<PathBuf>) -> Result<PathBuf> {
    let path = path.unwrap_or_else(|| {
        session
            .options()
            .save_root
            .join(format!("panel_{}.png", batch_stamp(chrono::Local::now())))
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let panel = compose_panel(&session.snapshot(), session.state(), session.toggles());
    panel
        .save_with_format(&path, image::ImageFormat::Png)
        .with_context(|| format!("write panel {}", path.display()))?;
    Ok(path)
}

fn print_status(session: &Session) {
    let toggles = session.toggles();
    println!(
        "state={} save_rgb={} save_depth={} save_lr={}",
        session.state(),
        toggles.color,
        toggles.depth,
        toggles.left_right
    );
    if let Some(summary) = session.last_summary() {
        println!(
            "last run: ticks={} frames={:?} transport_errors={:?} batches={}",
            summary.ticks, summary.frames, summary.transport_errors, summary.save_batches
        );
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = CaptureConfig::load()?;
    if let Some(device) = args.device {
        config.device = device;
    }
    if let Some(path) = args.save_path {
        config.save_path = path;
    }
    if let Some(ms) = args.tick_ms {
        config.tick = Duration::from_millis(ms);
    }
    if let Some(ms) = args.save_interval_ms {
        config.save_interval = Duration::from_millis(ms);
    }
    config.validate()?;

    log::info!(
        "capture_console: device={} save_path={}",
        config.device,
        config.save_path.display()
    );
    let mut session = Session::new(driver_for(&config.device), config.session_options());

    let (tx, rx) = mpsc::channel::<Option<String>>();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(None);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Some(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
            let _ = tx.send(None);
        })
        .context("spawn stdin reader")?;

    if args.autostart {
        session.dispatch(Action::Start);
    }

    let mut last_shown = 0u64;
    loop {
        match rx.recv_timeout(DISPLAY_CADENCE) {
            Ok(Some(line)) => match parse_command(&line) {
                Ok(Some(Command::Action(action))) => {
                    if session.dispatch(action) == Flow::Quit {
                        break;
                    }
                }
                Ok(Some(Command::Snap(path))) => match snap(&session, path) {
                    Ok(path) => println!("panel written to {}", path.display()),
                    Err(e) => log::error!("snap failed: {:#}", e),
                },
                Ok(Some(Command::Status)) => print_status(&session),
                Ok(None) => {}
                Err(e) => log::warn!("{}", e),
            },
            Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("capture_console: quit requested");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(message) = session.status(Instant::now()) {
            if message.sequence() != last_shown {
                last_shown = message.sequence();
                println!("[{}] {}", session.state(), message.text());
            }
        }
    }

    session.shutdown();
    if let Some(summary) = session.last_summary() {
        log::info!(
            "capture_console: exiting after {} ticks, {} frames",
            summary.ticks,
            summary.total_frames()
        );
    }
    Ok(())
}
