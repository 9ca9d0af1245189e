use homeagent_core::types::ChatMessage;
use homeagent_core::{Paths, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_type")]
enum HistoryLine {
    #[serde(rename = "metadata")]
    Metadata {
        created_at: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    #[serde(untagged)]
    Message(ChatMessage),
}

/// Per-channel conversation history.
///
/// Append-only apart from `clear`. Every channel is cached in memory and,
/// when built with [`ConversationHistoryStore::new`], mirrored to one JSONL
/// file under `~/.homeagent/history/`. Reads hand out copies.
pub struct ConversationHistoryStore {
    paths: Option<Paths>,
    channels: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl ConversationHistoryStore {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths: Some(paths),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// History that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            paths: None,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Copy of the channel's messages; empty for a channel never used.
    pub fn get(&self, key: &str) -> Result<Vec<ChatMessage>> {
        let mut channels = self.lock();
        Ok(self.channel(&mut channels, key)?.clone())
    }

    pub fn len(&self, key: &str) -> Result<usize> {
        let mut channels = self.lock();
        Ok(self.channel(&mut channels, key)?.len())
    }

    pub fn is_empty(&self, key: &str) -> Result<bool> {
        Ok(self.len(key)? == 0)
    }

    pub fn append(&self, key: &str, message: ChatMessage) -> Result<()> {
        self.append_all(key, vec![message])
    }

    pub fn append_all(&self, key: &str, messages: Vec<ChatMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut channels = self.lock();
        let channel = self.channel(&mut channels, key)?;
        self.write_lines(key, &messages)?;
        debug!(channel = key, count = messages.len(), "Appended to history");
        channel.extend(messages);
        Ok(())
    }

    /// Empty the channel and return how many messages it held.
    pub fn clear(&self, key: &str) -> Result<usize> {
        let mut channels = self.lock();
        let prior = self.channel(&mut channels, key)?.len();
        if let Some(paths) = &self.paths {
            let path = paths.history_file(key);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        channels.insert(key.to_string(), Vec::new());
        info!(channel = key, cleared = prior, "History cleared");
        Ok(prior)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<ChatMessage>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The cached channel, loading it from disk on first use.
    fn channel<'a>(
        &self,
        channels: &'a mut HashMap<String, Vec<ChatMessage>>,
        key: &str,
    ) -> Result<&'a mut Vec<ChatMessage>> {
        if !channels.contains_key(key) {
            let loaded = self.load(key)?;
            channels.insert(key.to_string(), loaded);
        }
        Ok(channels.entry(key.to_string()).or_default())
    }

    fn load(&self, key: &str) -> Result<Vec<ChatMessage>> {
        let Some(paths) = &self.paths else {
            return Ok(Vec::new());
        };
        let path = paths.history_file(key);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryLine>(&line) {
                Ok(HistoryLine::Message(msg)) => messages.push(msg),
                Ok(HistoryLine::Metadata { .. }) => {}
                Err(e) => debug!(error = %e, "Failed to parse history line, skipping"),
            }
        }
        debug!(channel = key, count = messages.len(), "Loaded history from disk");
        Ok(messages)
    }

    fn write_lines(&self, key: &str, messages: &[ChatMessage]) -> Result<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let path = paths.history_file(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if fresh {
            let metadata = HistoryLine::Metadata {
                created_at: chrono::Utc::now().to_rfc3339(),
                metadata: serde_json::json!({ "channel": key }),
            };
            writeln!(file, "{}", serde_json::to_string(&metadata)?)?;
        }
        for msg in messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        Ok(())
    }
}
