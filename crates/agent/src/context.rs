use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use homeagent_core::config::AgentDefaults;
use homeagent_core::types::ChatMessage;
use homeagent_core::{AgentRequest, Location};
use tracing::{debug, warn};

/// Builds the system messages that open every turn: persona, clock and
/// location, channel formatting. They are regenerated per call and must
/// never reach the history store.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    persona: String,
    unavailable_persona: String,
    timezone: Tz,
    channels: HashMap<String, String>,
}

impl ContextBuilder {
    pub fn new(defaults: &AgentDefaults) -> Self {
        Self {
            persona: defaults.persona.clone(),
            unavailable_persona: defaults.unavailable_persona.clone(),
            timezone: resolve_timezone(defaults.timezone.as_deref()),
            channels: defaults.channels.clone(),
        }
    }

    /// Ephemeral messages for `request` at the current time. With
    /// `capability_missing` the persona admits the requested capability is
    /// unavailable.
    pub fn ephemeral(&self, request: &AgentRequest, capability_missing: bool) -> Vec<ChatMessage> {
        self.ephemeral_at(request, capability_missing, Utc::now())
    }

    pub fn ephemeral_at(
        &self,
        request: &AgentRequest,
        capability_missing: bool,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        let persona = if capability_missing {
            &self.unavailable_persona
        } else {
            &self.persona
        };
        let mut messages = vec![
            ChatMessage::system(persona),
            ChatMessage::system(&self.temporal(now, request.location.as_ref())),
        ];
        if let Some(formatting) = self.channels.get(&request.channel) {
            messages.push(ChatMessage::system(formatting));
        }
        messages
    }

    fn temporal(&self, now: DateTime<Utc>, location: Option<&Location>) -> String {
        let local = now.with_timezone(&self.timezone);
        let mut text = format!(
            "Current date and time: {} ({}), ISO week {}.",
            local.format("%A %-d %B %Y, %H:%M"),
            self.timezone.name(),
            local.iso_week().week()
        );
        if let Some(loc) = location {
            text.push_str(&format!(
                " The user is at latitude {:.5}, longitude {:.5}.",
                loc.lat, loc.lon
            ));
        }
        text
    }
}

/// Configured zone, else the host zone, else UTC.
fn resolve_timezone(configured: Option<&str>) -> Tz {
    if let Some(name) = configured.filter(|n| !n.trim().is_empty()) {
        match name.trim().parse::<Tz>() {
            Ok(tz) => return tz,
            Err(e) => warn!(timezone = name, error = %e, "Unknown timezone in config, using host zone"),
        }
    }
    match iana_time_zone::get_timezone() {
        Ok(host) => host.parse::<Tz>().unwrap_or_else(|_| {
            debug!(timezone = %host, "Host timezone not in tz database, using UTC");
            Tz::UTC
        }),
        Err(e) => {
            debug!(error = %e, "Could not read host timezone, using UTC");
            Tz::UTC
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use homeagent_core::types::Role;

    fn builder() -> ContextBuilder {
        let mut defaults = AgentDefaults::default();
        defaults.persona = "You are Home.".to_string();
        defaults.unavailable_persona = "That is unavailable.".to_string();
        defaults.timezone = Some("Europe/Paris".to_string());
        defaults
            .channels
            .insert("speaker".to_string(), "Answer without markdown.".to_string());
        ContextBuilder::new(&defaults)
    }

    #[test]
    fn test_temporal_message_uses_zone_and_week() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 30, 0).unwrap();
        let request = AgentRequest::new("alice", "web", "hi");
        let messages = builder().ephemeral_at(&request, false, now);

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == Role::System));
        assert_eq!(messages[0].text(), "You are Home.");
        let temporal = messages[1].text();
        assert!(temporal.contains("Monday 19 October 2026, 14:30"), "{}", temporal);
        assert!(temporal.contains("Europe/Paris"));
        assert!(temporal.contains("ISO week 43"));
        assert!(!temporal.contains("latitude"));
    }

    #[test]
    fn test_location_and_channel_formatting() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let request = AgentRequest::new("alice", "speaker", "hi")
            .with_location(Location { lat: 48.8566, lon: 2.3522 });
        let messages = builder().ephemeral_at(&request, true, now);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text(), "That is unavailable.");
        assert!(messages[1].text().contains("latitude 48.85660, longitude 2.35220"));
        assert_eq!(messages[2].text(), "Answer without markdown.");
    }

    #[test]
    fn test_bad_timezone_falls_back() {
        let tz = resolve_timezone(Some("Mars/Olympus"));
        // Host zone or UTC, never a panic.
        assert!(!tz.name().is_empty());
        assert_eq!(resolve_timezone(Some("Asia/Tokyo")), Tz::Asia__Tokyo);
    }
}
