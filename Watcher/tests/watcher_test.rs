// Integration tests against a real directory

use offline_watcher::{
    Application, ApplicationHandle, FileWatcher, PayloadMatch, ShutdownNotice, ShutdownReason,
    WatchTarget, WatcherConfig, WatcherError,
};
use parking_lot::Mutex;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct Recorder {
    notices: Arc<Mutex<Vec<ShutdownNotice>>>,
}

impl Recorder {
    fn reasons(&self) -> Vec<ShutdownReason> {
        self.notices.lock().iter().map(|n| n.reason).collect()
    }
}

impl Application for Recorder {
    fn notify_shutdown(&self, notice: &ShutdownNotice) {
        self.notices.lock().push(notice.clone());
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start(dir: &TempDir, track: bool) -> (FileWatcher, Recorder) {
    init_logging();
    let recorder = Recorder::default();
    let target = WatchTarget::new(dir.path(), "app_offline.htm", track);
    let watcher = FileWatcher::create(target, ApplicationHandle::owned(recorder.clone())).unwrap();
    assert!(watcher.wait_for_monitor(100));
    (watcher, recorder)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

// Long enough for any stray event to have been delivered
fn quiet_period() {
    thread::sleep(Duration::from_millis(500));
}

#[test]
fn test_idle_directory_never_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let (watcher, recorder) = start(&dir, true);

    watcher.monitor().unwrap();
    fs::write(dir.path().join("web.config"), b"<configuration/>").unwrap();
    quiet_period();

    assert!(recorder.reasons().is_empty());
    assert!(!watcher.is_shutdown_triggered());
}

#[test]
fn test_marker_creation_notifies_once() {
    let dir = tempfile::tempdir().unwrap();
    let (watcher, recorder) = start(&dir, false);
    let marker = dir.path().join("app_offline.htm");

    for _ in 0..3 {
        fs::write(&marker, b"<html>offline</html>").unwrap();
        fs::remove_file(&marker).unwrap();
    }
    fs::write(&marker, b"<html>offline</html>").unwrap();

    assert!(eventually(|| !recorder.reasons().is_empty()));
    quiet_period();
    assert_eq!(recorder.reasons(), vec![ShutdownReason::AppOffline]);
    assert!(watcher.is_shutdown_triggered());
    assert!(!watcher.payload_changed());
}

#[test]
fn test_marker_renamed_into_place_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("staged.htm");
    fs::write(&staged, b"<html>offline</html>").unwrap();
    let (_watcher, recorder) = start(&dir, false);

    fs::rename(&staged, dir.path().join("APP_OFFLINE.HTM")).unwrap();

    assert!(eventually(|| !recorder.reasons().is_empty()));
    assert_eq!(recorder.reasons(), vec![ShutdownReason::AppOffline]);
}

#[test]
fn test_payload_change_ignored_without_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("site.dll");
    fs::write(&payload, b"v1").unwrap();
    let (watcher, recorder) = start(&dir, false);

    fs::write(&payload, b"version two").unwrap();
    quiet_period();

    assert!(recorder.reasons().is_empty());
    assert!(!watcher.payload_changed());
}

#[test]
fn test_payload_change_notifies_once_with_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("site.dll");
    fs::write(&payload, b"v1").unwrap();
    let (watcher, recorder) = start(&dir, true);

    fs::write(&payload, b"version two").unwrap();
    fs::write(&payload, b"version three").unwrap();

    assert!(eventually(|| watcher.payload_changed()));
    quiet_period();
    assert_eq!(recorder.reasons(), vec![ShutdownReason::PayloadChanged]);
}

#[test]
fn test_named_payload_ignores_other_extensions() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("other.dll"), b"v1").unwrap();
    fs::write(dir.path().join("site.bin"), b"v1").unwrap();

    let recorder = Recorder::default();
    let target = WatchTarget::new(dir.path(), "app_offline.htm", true)
        .with_payload(PayloadMatch::FileName("site.bin".to_string()));
    let watcher = FileWatcher::create(target, ApplicationHandle::owned(recorder.clone())).unwrap();
    assert!(watcher.wait_for_monitor(100));

    fs::write(dir.path().join("other.dll"), b"changed").unwrap();
    quiet_period();
    assert!(recorder.reasons().is_empty());

    fs::write(dir.path().join("site.bin"), b"changed").unwrap();
    assert!(eventually(|| !recorder.reasons().is_empty()));
    assert_eq!(recorder.reasons(), vec![ShutdownReason::PayloadChanged]);
}

#[test]
fn test_marker_and_payload_burst_notifies_once() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("site.dll");
    fs::write(&payload, b"v1").unwrap();
    let (watcher, recorder) = start(&dir, true);

    fs::write(&payload, b"version two").unwrap();
    fs::write(dir.path().join("app_offline.htm"), b"offline").unwrap();

    assert!(eventually(|| watcher.is_shutdown_triggered()));
    quiet_period();
    assert_eq!(recorder.reasons().len(), 1);
}

#[test]
fn test_stop_is_idempotent_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let (watcher, recorder) = start(&dir, false);

    let started = Instant::now();
    watcher.stop_monitor();
    watcher.stop_monitor();
    assert!(started.elapsed() < WatcherConfig::default().join_timeout + Duration::from_secs(1));
    assert!(!watcher.is_ready());
    assert!(!watcher.is_running());
    assert!(!watcher.wait_for_monitor(5));

    fs::write(dir.path().join("app_offline.htm"), b"offline").unwrap();
    quiet_period();
    assert!(recorder.reasons().is_empty());
}

#[test]
fn test_drop_releases_application() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let handle = ApplicationHandle::new(Recorder::default(), move |application| {
        flag.store(true, Ordering::SeqCst);
        drop(application);
    });

    let watcher =
        FileWatcher::create(WatchTarget::new(dir.path(), "app_offline.htm", false), handle).unwrap();
    drop(watcher);

    assert!(released.load(Ordering::SeqCst));
    // The directory can be removed once the watcher is gone
    dir.close().unwrap();
}

#[test]
fn test_missing_directory_fails_initialization() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("not-here");

    let result = FileWatcher::create(
        WatchTarget::new(&missing, "app_offline.htm", false),
        ApplicationHandle::owned(Recorder::default()),
    );

    match result {
        Err(WatcherError::Initialization { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected initialization error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_file_path_fails_initialization() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app_offline.htm");
    fs::write(&file, b"offline").unwrap();

    let result = FileWatcher::create(
        WatchTarget::new(&file, "app_offline.htm", false),
        ApplicationHandle::owned(Recorder::default()),
    );
    assert!(matches!(result, Err(WatcherError::Initialization { .. })));
}
