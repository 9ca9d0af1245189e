use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use homeagent_core::{ModuleManifest, Result};
use serde::Serialize;
use tracing::{debug, warn};

const MANIFEST_FILES: &[&str] = &["manifest.yaml", "manifest.yml", "manifest.json"];

/// Where a module came from and which revision of it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub manifest_path: PathBuf,
    /// md5 of the manifest bytes plus its modification time.
    pub revision: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub manifest: ModuleManifest,
    pub dir: PathBuf,
    pub source: SourceDescriptor,
}

/// Scan `dir` for module directories. Unreadable manifests are logged and
/// skipped; nothing is instantiated.
pub fn discover(dir: &Path) -> Result<Vec<DiscoveredModule>> {
    if !dir.is_dir() {
        debug!(path = %dir.display(), "Module directory missing, nothing to discover");
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match read_module(&path) {
            Ok(Some(module)) => {
                debug!(module = %module.manifest.id, kind = ?module.manifest.kind, "Discovered module");
                found.push(module);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping module with unreadable manifest"),
        }
    }
    found.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
    Ok(found)
}

/// Read one module directory. `Ok(None)` when it has no manifest at all.
pub fn read_module(module_dir: &Path) -> Result<Option<DiscoveredModule>> {
    let Some(manifest_path) = MANIFEST_FILES
        .iter()
        .map(|name| module_dir.join(name))
        .find(|p| p.is_file())
    else {
        return Ok(None);
    };

    let bytes = std::fs::read(&manifest_path)?;
    let mut manifest: ModuleManifest = if manifest_path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml::from_slice(&bytes)?
    };
    if manifest.id.trim().is_empty() {
        manifest.id = dir_name(module_dir);
    }

    let mtime = std::fs::metadata(&manifest_path)?
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let revision = format!("{:x}-{}", md5::compute(&bytes), mtime);

    Ok(Some(DiscoveredModule {
        manifest,
        dir: module_dir.to_path_buf(),
        source: SourceDescriptor {
            manifest_path,
            revision,
        },
    }))
}

pub fn dir_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}
