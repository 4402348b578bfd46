//! kiosk - Pallet kiosk controller daemon.
//!
//! Reads pallet codes from the configured scanner, runs a capture round per code
//! and relays stored frames to the collection endpoint. Per-camera status is shown
//! on stderr.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use pallet_kiosk::capture::attempted_slots;
use pallet_kiosk::scanner::ScannerHandle;
use pallet_kiosk::ui::{StatusDisplay, UiMode};
use pallet_kiosk::{Kiosk, KioskConfig, PalletCode, ReloadPolicy, ScannerSource};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Scan a pallet code, capture every camera slot and relay the frames upstream"
)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Scanner source override: "keyboard" or a serial device path.
    #[arg(long)]
    scanner: Option<String>,

    /// Status display mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,

    /// Run a single round for CODE, wait for its uploads and exit.
    #[arg(long, value_name = "CODE")]
    once: Option<String>,

    /// Seconds between config file change checks (0 disables reloading).
    #[arg(long, env = "KIOSK_RELOAD_INTERVAL_SECS", default_value = "5")]
    reload_interval_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {:<5} {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                std::thread::current().name().unwrap_or("-"),
                record.level(),
                record.args()
            )
        })
        .init();
    let args = Args::parse();

    let config = load_config(args.config.as_deref(), args.scanner.as_deref())?;
    log::info!(
        "kiosk starting: {} slot(s) configured, frames in {}",
        attempted_slots(&config.slot_snapshot()),
        config.storage.dir.display()
    );

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let display = StatusDisplay::new(UiMode::parse(Some(&args.ui)), is_tty, !stdout_is_tty);

    let (events_tx, events_rx) = mpsc::channel();
    let presenter = std::thread::Builder::new()
        .name("presenter".into())
        .spawn(move || display.run(events_rx))
        .context("spawn presenter thread")?;

    let mut kiosk = Kiosk::new(config, events_tx)?;

    if let Some(code) = args.once.as_deref() {
        let code = PalletCode::new(code).ok_or_else(|| anyhow!("--once needs a non-empty code"))?;
        let results = kiosk.on_trigger(&code);
        kiosk.shutdown(ReloadPolicy::Drain)?;
        let board = presenter
            .join()
            .map_err(|_| anyhow!("presenter thread panicked"))?;
        for (cam, status) in board.iter() {
            log::debug!("final status cam {}: {}", cam, status);
        }
        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            log::warn!("{} of {} capture(s) failed", failed, results.len());
        }
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let (codes_tx, codes_rx) = mpsc::channel::<PalletCode>();
    let mut scanner = ScannerHandle::spawn(&kiosk.config().scanner, codes_tx.clone())?;

    let reload_interval = Duration::from_secs(args.reload_interval_secs);
    let mut config_mtime = args.config.as_deref().and_then(modified);
    let mut last_reload_check = Instant::now();

    log::info!("kiosk ready; waiting for scans (Ctrl-C to stop)");
    while !shutdown.load(Ordering::SeqCst) {
        match codes_rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(code) => {
                kiosk.on_trigger(&code);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(path) = args.config.as_deref() else {
            continue;
        };
        if reload_interval.is_zero() || last_reload_check.elapsed() < reload_interval {
            continue;
        }
        last_reload_check = Instant::now();
        let current = modified(path);
        if current == config_mtime {
            continue;
        }
        config_mtime = current;
        log::info!("config file {} changed; reloading", path.display());
        let next = match load_config(Some(path), args.scanner.as_deref()) {
            Ok(next) => next,
            Err(err) => {
                log::warn!("reload rejected, keeping current configuration: {:#}", err);
                continue;
            }
        };
        let scanner_changed = next.scanner.source != *scanner.source();
        let scanner_settings = next.scanner.clone();
        if let Err(err) = kiosk.reconfigure(next) {
            log::error!("reload failed: {:#}", err);
            continue;
        }
        if scanner_changed {
            scanner.stop()?;
            scanner = ScannerHandle::spawn(&scanner_settings, codes_tx.clone())?;
        }
    }

    log::info!("shutdown signal received, draining uploads...");
    drop(codes_tx);
    scanner.stop()?;
    kiosk.shutdown(ReloadPolicy::Drain)?;
    presenter
        .join()
        .map_err(|_| anyhow!("presenter thread panicked"))?;
    log::info!("kiosk stopped");
    Ok(())
}

fn load_config(path: Option<&Path>, scanner: Option<&str>) -> Result<KioskConfig> {
    let mut config = KioskConfig::load_from(path)?;
    if let Some(scanner) = scanner {
        config.scanner.source = ScannerSource::parse(scanner);
    }
    Ok(config)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
