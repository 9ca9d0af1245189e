//! Hot reload: filesystem events under the module directory are collapsed
//! per module directory and handed to the registry once they settle.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use homeagent_core::{Error, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::ModuleRegistry;

/// Collapses bursts of changes: a key is ready once `window` has passed
/// since its last touch.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn touch(&mut self, key: String, now: Instant) {
        self.pending.insert(key, now);
    }

    pub fn drain_ready(&mut self, now: Instant) -> Vec<String> {
        let mut ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.window)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &ready {
            self.pending.remove(key);
        }
        ready.sort();
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct ModuleWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ModuleWatcher {
    /// Watch the registry's module directory until the watcher is dropped.
    pub fn start(registry: Arc<ModuleRegistry>, debounce: Duration) -> Result<Self> {
        let root = registry.directory().clone();
        std::fs::create_dir_all(&root)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watch_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in &event.paths {
                        if let Some(dir) = module_dir_of(&watch_root, path) {
                            let _ = tx.send(dir);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Module watcher error"),
            },
            Config::default(),
        )
        .map_err(|e| Error::Other(format!("Failed to create module watcher: {}", e)))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Other(format!("Failed to watch {}: {}", root.display(), e)))?;
        info!(path = %root.display(), debounce_ms = debounce.as_millis() as u64, "Watching modules for changes");

        let task = tokio::spawn(run(registry, rx, debounce));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(registry: Arc<ModuleRegistry>, mut rx: mpsc::UnboundedReceiver<String>, debounce: Duration) {
    let mut debouncer = Debouncer::new(debounce);
    let mut ticker = tokio::time::interval((debounce / 4).max(Duration::from_millis(50)));
    loop {
        tokio::select! {
            changed = rx.recv() => match changed {
                Some(dir) => {
                    debug!(module_dir = %dir, "Module change observed");
                    debouncer.touch(dir, Instant::now());
                }
                None => break,
            },
            _ = ticker.tick() => {
                for dir in debouncer.drain_ready(Instant::now()) {
                    if let Err(e) = registry.handle_change(&dir).await {
                        warn!(module_dir = %dir, error = %e, "Hot reload failed");
                    }
                }
            }
        }
    }
}

/// The top-level module directory `path` belongs to, if any. Hidden
/// entries are ignored.
fn module_dir_of(root: &Path, path: &Path) -> Option<String> {
    let relative: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    match relative.components().next()? {
        Component::Normal(name) => {
            let name = name.to_str()?;
            (!name.starts_with('.')).then(|| name.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_waits_for_quiet_period() {
        let window = Duration::from_millis(500);
        let mut debouncer = Debouncer::new(window);
        let start = Instant::now();

        debouncer.touch("weather".into(), start);
        debouncer.touch("weather".into(), start + Duration::from_millis(300));
        debouncer.touch("lights".into(), start + Duration::from_millis(100));

        assert!(debouncer.drain_ready(start + Duration::from_millis(400)).is_empty());
        assert_eq!(debouncer.drain_ready(start + Duration::from_millis(600)), vec!["lights"]);
        assert_eq!(debouncer.drain_ready(start + Duration::from_millis(800)), vec!["weather"]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_module_dir_of() {
        let root = Path::new("/srv/modules");
        assert_eq!(
            module_dir_of(root, Path::new("/srv/modules/weather/manifest.yaml")),
            Some("weather".to_string())
        );
        assert_eq!(
            module_dir_of(root, Path::new("/srv/modules/weather")),
            Some("weather".to_string())
        );
        assert_eq!(module_dir_of(root, Path::new("/srv/modules/.swap/x")), None);
        assert_eq!(module_dir_of(root, Path::new("/elsewhere/file")), None);
        assert_eq!(module_dir_of(root, root), None);
    }
}
