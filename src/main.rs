// offline-watch: hosts a FileWatcher over one application directory
// Exits once the watched application has been asked to shut down, or on Ctrl+C

mod cli;
mod host;

use anyhow::{bail, Context, Result};
use cli::{ColorMode, OutputFormat};
use host::{HostApplication, HostEvent, ShutdownReport};
use log::{debug, info, warn};
use offline_watcher::{ApplicationHandle, FileWatcher, ShutdownReason, WatchTarget, WATCHER_VERSION};
use std::sync::mpsc;
use std::time::Duration;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    // ========================================================================
    // Parse Command-Line Arguments
    // ========================================================================

    let args = cli::parse_args();

    let use_colors = match args.color {
        ColorMode::Auto => atty::is(atty::Stream::Stdout),
        ColorMode::Always => true,
        ColorMode::Never => false,
    };
    colored::control::set_override(use_colors);

    // ========================================================================
    // Start Watching
    // ========================================================================

    let target = WatchTarget::new(&args.directory, &args.file, args.track_payload)
        .with_payload(args.payload_match());

    let (events, received) = mpsc::channel();
    let application = ApplicationHandle::new(HostApplication::new(events.clone()), |application| {
        debug!("Host application released");
        drop(application);
    });

    info!("offline-watch v{} starting", WATCHER_VERSION);
    let watcher = FileWatcher::create(target, application)
        .with_context(|| format!("Failed to watch {}", args.directory.display()))?;

    if watcher.target().track_payload_changes() {
        info!("Tracking payload files matching {:?}", watcher.target().payload());
    }

    if !watcher.wait_for_monitor(args.wait_retries) {
        warn!(
            "Monitor not ready after {} polls; continuing anyway",
            args.wait_retries
        );
    }

    // A marker that predates the watch produces no change record
    if watcher.target().marker_path().exists() {
        info!("{} already present", watcher.target().file_name());
        watcher.call_shutdown(ShutdownReason::AppOffline);
    }

    ctrlc::set_handler(move || {
        let _ = events.send(HostEvent::Interrupted);
    })
    .context("Error setting Ctrl-C handler")?;

    // ========================================================================
    // Wait For Shutdown
    // ========================================================================

    let event = loop {
        match received.recv_timeout(HEALTH_CHECK_INTERVAL) {
            Ok(event) => break event,
            // A triggered shutdown may still be on its way to the channel
            Err(_) if watcher.is_running() || watcher.is_shutdown_triggered() => continue,
            Err(_) => bail!(
                "Monitor for {} stopped without a shutdown request",
                watcher.target().directory().display()
            ),
        }
    };

    match event {
        HostEvent::Shutdown(notice) => {
            if !args.quiet {
                let report = ShutdownReport {
                    directory: watcher.target().directory(),
                    reason: notice.reason,
                    requested_at: notice.requested_at,
                    payload_changed: watcher.payload_changed(),
                };
                let output = match args.format {
                    OutputFormat::Text => report.to_text(use_colors),
                    OutputFormat::Json => report.to_json()?,
                };
                println!("{}", output);
            }
        }
        HostEvent::Interrupted => {
            if !args.quiet {
                println!("\nShutting down...");
            }
        }
    }

    drop(watcher);
    Ok(())
}
