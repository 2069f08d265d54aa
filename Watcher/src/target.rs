use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Marker file name used by hosts that don't configure one
pub const DEFAULT_MARKER_FILE: &str = "app_offline.htm";

/// Payload extension tracked when no explicit payload is configured
pub const DEFAULT_PAYLOAD_EXTENSION: &str = "dll";

/// How payload files are recognised inside the watched directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadMatch {
    /// Any file with this extension (without the leading dot)
    Extension(String),

    /// One specific file
    FileName(String),
}

impl PayloadMatch {
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            PayloadMatch::Extension(extension) => Path::new(file_name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase() == extension.to_lowercase())
                .unwrap_or(false),
            PayloadMatch::FileName(name) => names_equal(name, file_name),
        }
    }
}

impl Default for PayloadMatch {
    fn default() -> Self {
        PayloadMatch::Extension(DEFAULT_PAYLOAD_EXTENSION.to_string())
    }
}

/// Directory and files a watcher is responsible for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    directory: PathBuf,
    file_name: String,
    track_payload_changes: bool,
    payload: PayloadMatch,
}

impl WatchTarget {
    pub fn new(
        directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
        track_payload_changes: bool,
    ) -> Self {
        WatchTarget {
            directory: directory.into(),
            file_name: file_name.into(),
            track_payload_changes,
            payload: PayloadMatch::default(),
        }
    }

    /// Replace the payload matcher
    pub fn with_payload(mut self, payload: PayloadMatch) -> Self {
        self.payload = payload;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn track_payload_changes(&self) -> bool {
        self.track_payload_changes
    }

    pub fn payload(&self) -> &PayloadMatch {
        &self.payload
    }

    /// Full path of the offline marker
    pub fn marker_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    pub fn is_marker(&self, file_name: &str) -> bool {
        names_equal(&self.file_name, file_name)
    }

    /// Only true when payload tracking is enabled
    pub fn is_payload(&self, file_name: &str) -> bool {
        self.track_payload_changes && self.payload.matches(file_name)
    }
}

// Windows names compare case-insensitively; the same rule is applied everywhere
fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

// ============================================================================
// Payload Snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

/// Size and mtime of every payload file, used when change records were lost
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSnapshot {
    files: BTreeMap<String, Fingerprint>,
}

impl PayloadSnapshot {
    /// Read the payload files currently present in the target directory
    pub fn capture(target: &WatchTarget) -> Self {
        let mut files = BTreeMap::new();
        if !target.track_payload_changes() {
            return PayloadSnapshot { files };
        }

        let entries = WalkDir::new(target.directory())
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("Skipping unreadable entry during payload scan: {}", e);
                    None
                }
            });

        for entry in entries {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !target.is_payload(&name) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                files.insert(
                    name,
                    Fingerprint {
                        len: metadata.len(),
                        modified: metadata.modified().ok(),
                    },
                );
            }
        }

        PayloadSnapshot { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
