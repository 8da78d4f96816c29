use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use office_core::agent_files::is_agent_file;
use office_core::{FsClock, Office};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to prepare agent directory {path}: {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce: Duration,
    pub sweep_interval: Duration,
}

/// Non-recursive notify watch on the agent directory.
pub struct DirWatch {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    tx: mpsc::UnboundedSender<notify::Result<Event>>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl DirWatch {
    /// Create the directory if needed and start watching it. Failing here is
    /// the only error the bridge treats as fatal.
    pub fn establish(dir: &Path) -> Result<Self, WatchError> {
        let dir_err = |source| WatchError::Dir {
            path: dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(dir_err)?;
        let dir = dir.canonicalize().map_err(dir_err)?;

        let (tx, events) = mpsc::unbounded_channel();
        let watcher = start_watcher(&dir, tx.clone())?;
        info!(event = "watch_started", dir = %dir.display());
        Ok(Self {
            dir,
            watcher: Some(watcher),
            tx,
            events,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop a watch whose directory vanished and re-arm once it is back.
    /// Returns true when a fresh watch was started.
    fn ensure(&mut self) -> bool {
        if !self.dir.is_dir() {
            if self.watcher.take().is_some() {
                warn!(event = "watch_lost", dir = %self.dir.display());
            }
            return false;
        }
        if self.watcher.is_some() {
            return false;
        }
        match start_watcher(&self.dir, self.tx.clone()) {
            Ok(watcher) => {
                info!(event = "watch_restored", dir = %self.dir.display());
                self.watcher = Some(watcher);
                true
            }
            Err(err) => {
                warn!(event = "watch_retry_failed", error = %err);
                false
            }
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path()) && is_agent_file(path)
    }
}

fn start_watcher(
    dir: &Path,
    tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> Result<RecommendedWatcher, WatchError> {
    let notify_err = |source| WatchError::Notify {
        path: dir.to_path_buf(),
        source,
    };
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })
    .map_err(notify_err)?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(notify_err)?;
    Ok(watcher)
}

/// Agent files currently in `dir`, sorted by path.
fn scan(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(event = "scan_failed", dir = %dir.display(), error = %err);
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_agent_file(path))
        .collect();
    paths.sort();
    paths
}

fn initial_scan(office: &mut Office, dir: &Path) {
    let paths = scan(dir);
    let mut loaded = 0;
    for path in &paths {
        if office.ingest_file(path, true) {
            loaded += 1;
        }
    }
    info!(event = "initial_scan", dir = %dir.display(), files = paths.len(), loaded);
}

/// Reconcile after a gap in notifications.
fn rescan(office: &mut Office, dir: &Path) {
    let gone: Vec<PathBuf> = office
        .registry()
        .sources()
        .map(|(_, path)| path.to_path_buf())
        .filter(|path| !path.exists())
        .collect();
    for path in gone {
        office.remove_source(&path);
    }
    for path in scan(dir) {
        office.refresh_path(&path);
    }
}

/// Bring virtual time up to the wall clock. Runs before every mutation so
/// cues it schedules are measured from now, not from the last wakeup.
fn catch_up(office: &mut Office, epoch: Instant) {
    office.advance_to(epoch.elapsed());
}

/// Reconcile every pending path whose debounce window has closed.
fn flush_due(office: &mut Office, pending: &mut HashMap<PathBuf, Instant>, epoch: Instant) {
    catch_up(office, epoch);
    let now = Instant::now();
    let mut due: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(path, _)| path.clone())
        .collect();
    due.sort();
    for path in due {
        pending.remove(&path);
        debug!(event = "path_flush", path = %path.display());
        office.refresh_path(&path);
    }
}

fn sweep_tick(dir_watch: &mut DirWatch, office: &mut Office, epoch: Instant) {
    catch_up(office, epoch);
    if dir_watch.ensure() {
        let dir = dir_watch.dir().to_path_buf();
        rescan(office, &dir);
    }
    office.sweep(SystemTime::now(), &FsClock);
}

/// Drive `office` from filesystem notifications until `shutdown` flips.
///
/// Owns the office for its whole life: every update, sweep and delayed cue
/// is applied here, one at a time.
pub async fn run(
    mut dir_watch: DirWatch,
    mut office: Office,
    config: WatcherConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let dir = dir_watch.dir().to_path_buf();
    initial_scan(&mut office, &dir);
    office.publish_snapshot();

    let epoch = Instant::now();
    let sweep_every = config.sweep_interval.max(Duration::from_secs(1));
    let mut sweep = tokio::time::interval_at(Instant::now() + sweep_every, sweep_every);
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        catch_up(&mut office, epoch);
        let flush_at = pending.values().min().copied();
        let cue_at = office.next_due().map(|due| Instant::now() + due);

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(res) = dir_watch.events.recv() => match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        continue;
                    }
                    let deadline = Instant::now() + config.debounce;
                    for path in event.paths {
                        if dir_watch.is_relevant(&path) {
                            pending.insert(path, deadline);
                        }
                    }
                }
                Err(err) => warn!(event = "watch_error", error = %err),
            },
            _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                flush_due(&mut office, &mut pending, epoch);
            }
            _ = tokio::time::sleep_until(cue_at.unwrap_or_else(Instant::now)), if cue_at.is_some() => {}
            _ = sweep.tick() => sweep_tick(&mut dir_watch, &mut office, epoch),
        }
    }

    drop(dir_watch);
    office.hub().shutdown();
    info!(event = "watch_stopped", dir = %dir.display());
}
