// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inbox watching: files dropped into a directory are imported automatically

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::db::Image;
use crate::library::MemeLibrary;
use crate::Result;

/// Events emitted by the watcher
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A new file appeared
    FileCreated(PathBuf),
    /// A file was written to
    FileModified(PathBuf),
    /// Watcher error
    Error(String),
    /// The event channel closed
    Disconnected,
}

/// File system watcher over one or more inbox directories
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();

        let config = Config::default()
            .with_poll_interval(Duration::from_secs(2));

        let watcher = RecommendedWatcher::new(tx, config)?;

        Ok(Self {
            watcher,
            event_rx: rx,
        })
    }

    /// Add a directory to watch, creating it if needed
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            info!("Created inbox directory: {:?}", path);
        }

        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", path);

        Ok(())
    }

    /// Get the next event (blocking with timeout)
    pub fn next_event(&self, timeout: Duration) -> Option<WatchEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Self::convert_event(event),
            Ok(Err(e)) => Some(WatchEvent::Error(e.to_string())),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Some(WatchEvent::Disconnected),
        }
    }

    fn convert_event(event: Event) -> Option<WatchEvent> {
        match event.kind {
            EventKind::Create(_) => {
                event.paths.first().map(|p| WatchEvent::FileCreated(p.clone()))
            }
            EventKind::Modify(_) => {
                event.paths.first().map(|p| WatchEvent::FileModified(p.clone()))
            }
            _ => None,
        }
    }
}

/// Check if a dropped file should be picked up
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Skip partial downloads
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

/// Wait until the file size stops changing.
///
/// Returns `false` if the file disappeared meanwhile.
pub fn wait_for_stable(path: &Path, check_interval: Duration, max_wait: Duration) -> bool {
    let start = Instant::now();

    let mut last_size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        std::thread::sleep(check_interval);

        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true;
        }

        let current_size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        if current_size == last_size {
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}

/// Imports files that land in an inbox directory
pub struct Inbox<'a> {
    library: &'a MemeLibrary,
    tags: Vec<String>,
    remove_after_import: bool,
    settle: Duration,
}

impl<'a> Inbox<'a> {
    pub fn new(library: &'a MemeLibrary, tags: Vec<String>, remove_after_import: bool, settle: Duration) -> Self {
        Self { library, tags, remove_after_import, settle }
    }

    /// Import a single dropped file. Files the library cannot take are left alone.
    pub fn import(&self, path: &Path) -> Option<Image> {
        if !path.is_file() || !should_process(path) {
            return None;
        }
        if !self.library.storage().is_supported_format(path) {
            debug!("Ignoring unsupported file in inbox: {:?}", path);
            return None;
        }
        if !wait_for_stable(path, self.settle, Duration::from_secs(10)) {
            debug!("File disappeared during stability check: {:?}", path);
            return None;
        }

        match self.library.import_file(path, &self.tags) {
            Ok(image) => {
                info!("Imported {:?} as #{}", path, image.id);
                if self.remove_after_import {
                    if let Err(e) = std::fs::remove_file(path) {
                        warn!("Imported but could not remove {:?}: {}", path, e);
                    }
                }
                Some(image)
            }
            Err(e) => {
                warn!("Failed to import {:?}: {}", path, e);
                None
            }
        }
    }

    /// Import whatever is already sitting in `dir`
    pub fn import_existing(&self, dir: &Path) -> Result<Vec<Image>> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        Ok(entries.iter().filter_map(|p| self.import(p)).collect())
    }

    /// Process watcher events until the watcher goes away
    pub fn run(&self, watcher: &FileWatcher) -> Result<()> {
        self.run_until(watcher, &AtomicBool::new(false))
    }

    /// Process watcher events until `stop` is set or the watcher goes away
    pub fn run_until(&self, watcher: &FileWatcher, stop: &AtomicBool) -> Result<()> {
        info!("Inbox active. Press Ctrl+C to stop.");
        // a single drop produces several create/modify events; only files
        // still in the inbox are remembered, so a re-drop under the same
        // name or a rewrite counts as new
        let mut seen: HashMap<PathBuf, Fingerprint> = HashMap::new();
        while !stop.load(Ordering::Relaxed) {
            match watcher.next_event(Duration::from_millis(200)) {
                Some(WatchEvent::FileCreated(path)) | Some(WatchEvent::FileModified(path)) => {
                    let current = match fingerprint(&path) {
                        Some(f) => f,
                        None => {
                            seen.remove(&path);
                            continue;
                        }
                    };
                    if seen.get(&path) == Some(&current) {
                        continue;
                    }
                    if self.import(&path).is_some() {
                        match fingerprint(&path) {
                            Some(after) => {
                                seen.insert(path, after);
                            }
                            None => {
                                seen.remove(&path);
                            }
                        }
                    }
                }
                Some(WatchEvent::Error(e)) => warn!("Watch error: {}", e),
                Some(WatchEvent::Disconnected) => {
                    warn!("Watcher disconnected, stopping inbox");
                    return Ok(());
                }
                None => seen.retain(|path, _| path.exists()),
            }
        }
        info!("Inbox stopped");
        Ok(())
    }
}

/// Size and modification time of a file
type Fingerprint = (u64, Option<SystemTime>);

/// `None` once the file is gone
fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    meta.is_file().then(|| (meta.len(), meta.modified().ok()))
}
