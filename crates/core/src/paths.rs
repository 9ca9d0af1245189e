use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".homeagent"))
            .unwrap_or_else(|| PathBuf::from(".homeagent"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base.join("state")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.base.join("history")
    }

    /// One file per channel key. The key is percent-escaped so distinct
    /// keys never share a file.
    pub fn history_file(&self, channel_key: &str) -> PathBuf {
        self.history_dir().join(format!("{}.jsonl", escape_key(channel_key)))
    }

    /// Default module source location when `modules.directory` is unset.
    pub fn modules_dir(&self) -> PathBuf {
        self.base.join("modules")
    }

    /// Persisted enabled flags, keyed by scope then module id.
    pub fn toggles_file(&self) -> PathBuf {
        self.state_dir().join("modules.json")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.state_dir())?;
        std::fs::create_dir_all(self.history_dir())?;
        std::fs::create_dir_all(self.modules_dir())?;
        Ok(())
    }
}

/// Reversible escaping of `%`, `:`, `/` and `\\` for use in keys and file names.
pub fn escape_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
