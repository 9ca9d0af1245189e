use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::module::ComplexityTier;
use crate::paths::escape_key;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl std::str::FromStr for Location {
    type Err = String;

    /// Parses `"lat,lon"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'lat,lon', got '{}'", s))?;
        let lat: f64 = lat.trim().parse().map_err(|_| format!("invalid latitude '{}'", lat))?;
        let lon: f64 = lon.trim().parse().map_err(|_| format!("invalid longitude '{}'", lon))?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("coordinates out of range: {},{}", lat, lon));
        }
        Ok(Self { lat, lon })
    }
}

/// One inbound user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub user: String,
    pub channel: String,
    pub text: String,
    #[serde(default)]
    pub location: Option<Location>,
    /// Minimum complexity tier requested by the caller.
    #[serde(default)]
    pub tier: ComplexityTier,
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl AgentRequest {
    pub fn new(user: &str, channel: &str, text: &str) -> Self {
        Self {
            user: user.to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
            location: None,
            tier: ComplexityTier::Cheap,
            cancel: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Key of the persisted history this turn reads and appends to. Both
    /// parts are escaped so the `:` separator is unambiguous.
    pub fn history_key(&self) -> String {
        format!("{}:{}", escape_key(&self.user), escape_key(&self.channel))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Reset,
    Error,
}

/// Structured outcome of a turn. Failures are values, never faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether retrying later may succeed (false means misconfiguration).
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub iterations: u32,
}

impl AgentReply {
    pub fn ok(answer: String, modules: Vec<String>, iterations: u32) -> Self {
        Self {
            status: ReplyStatus::Ok,
            answer: Some(answer),
            error_kind: None,
            error: None,
            retryable: false,
            modules,
            iterations,
        }
    }

    pub fn reset(greeting: String) -> Self {
        Self {
            status: ReplyStatus::Reset,
            answer: Some(greeting),
            error_kind: None,
            error: None,
            retryable: false,
            modules: Vec::new(),
            iterations: 0,
        }
    }

    pub fn failure(err: &Error, modules: Vec<String>, iterations: u32) -> Self {
        Self {
            status: ReplyStatus::Error,
            answer: None,
            error_kind: Some(err.kind().to_string()),
            error: Some(err.to_string()),
            retryable: err.is_retryable(),
            modules,
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse() {
        let loc: Location = "48.85, 2.35".parse().unwrap();
        assert_eq!(loc, Location { lat: 48.85, lon: 2.35 });
        assert!("48.85".parse::<Location>().is_err());
        assert!("91,0".parse::<Location>().is_err());
    }

    #[test]
    fn test_failure_reply_carries_kind() {
        let reply = AgentReply::failure(&Error::Schedule("budget".into()), vec!["calendar".into()], 10);
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.error_kind.as_deref(), Some("schedule_error"));
        assert!(reply.retryable);

        let reply = AgentReply::failure(&Error::Config("collision".into()), vec![], 0);
        assert!(!reply.retryable);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("answer").is_none());
    }

    #[test]
    fn test_history_key_and_cancel() {
        let token = CancellationToken::new();
        let req = AgentRequest::new("alice", "kitchen", "hi").with_cancel(token.clone());
        assert_eq!(req.history_key(), "alice:kitchen");
        assert!(!req.is_cancelled());
        token.cancel();
        assert!(req.is_cancelled());
    }

    #[test]
    fn test_history_key_separates_user_and_channel() {
        let a = AgentRequest::new("a", "b:web", "hi");
        let b = AgentRequest::new("a:b", "web", "hi");
        assert_ne!(a.history_key(), b.history_key());
        assert_eq!(a.history_key(), "a:b%3Aweb");
    }
}
