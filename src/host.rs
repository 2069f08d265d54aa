// Host side of the watcher: receives the shutdown notice and reports it

use chrono::{DateTime, Utc};
use colored::Colorize;
use offline_watcher::{Application, ShutdownNotice, ShutdownReason};
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::Sender;

/// What ends the host's wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Shutdown(ShutdownNotice),
    Interrupted,
}

/// Application that forwards its shutdown notice to the main thread
pub struct HostApplication {
    events: Sender<HostEvent>,
}

impl HostApplication {
    pub fn new(events: Sender<HostEvent>) -> Self {
        HostApplication { events }
    }
}

impl Application for HostApplication {
    fn notify_shutdown(&self, notice: &ShutdownNotice) {
        let _ = self.events.send(HostEvent::Shutdown(notice.clone()));
    }
}

// ============================================================================
// Report Output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ShutdownReport<'a> {
    pub directory: &'a Path,
    pub reason: ShutdownReason,
    pub requested_at: DateTime<Utc>,
    pub payload_changed: bool,
}

impl ShutdownReport<'_> {
    pub fn to_text(&self, use_colors: bool) -> String {
        let timestamp = self.requested_at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string();
        let reason = self.reason.to_string();
        let directory = self.directory.display().to_string();

        if use_colors {
            format!(
                "{} shutdown requested: {} ({})",
                timestamp.dimmed(),
                reason.red().bold(),
                directory.cyan()
            )
        } else {
            format!("{} shutdown requested: {} ({})", timestamp, reason, directory)
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_host_application_forwards_notice() {
        let (tx, rx) = mpsc::channel();
        let app = HostApplication::new(tx);
        let notice = ShutdownNotice::new(ShutdownReason::AppOffline);

        app.notify_shutdown(&notice);

        assert_eq!(rx.recv().unwrap(), HostEvent::Shutdown(notice));
    }

    #[test]
    fn test_report_text_and_json() {
        let notice = ShutdownNotice::new(ShutdownReason::PayloadChanged);
        let report = ShutdownReport {
            directory: Path::new("/srv/app"),
            reason: notice.reason,
            requested_at: notice.requested_at,
            payload_changed: true,
        };

        let text = report.to_text(false);
        assert!(text.contains("shutdown requested"));
        assert!(text.contains("/srv/app"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["reason"], "payload_changed");
        assert_eq!(json["payload_changed"], true);
    }
}
