mod common;

use std::sync::atomic::Ordering;

use common::*;
use homeagent_core::types::{Role, ToolCallRequest};
use homeagent_core::config::AgentDefaults;
use homeagent_core::{AgentRequest, Error, ReplyStatus};
use homeagent_modules::Scope;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn list_events() -> homeagent_core::types::LLMResponse {
    tool_calls(vec![ToolCallRequest::new("call_1", "list_events", json!({"day": "today"}))])
}

#[tokio::test]
async fn calendar_request_runs_tool_and_persists_turn() {
    let main = ScriptedProvider::new(vec![
        Ok(select(&["calendar"])),
        Ok(list_events()),
        Ok(stop("You have the dentist at 15:00.")),
    ]);
    let h = HarnessBuilder::new(main).module("calendar", CALENDAR_MANIFEST).build().await;

    let reply = h
        .kernel
        .handle(AgentRequest::new("alice", "web", "what is on my calendar today"))
        .await;

    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.answer.as_deref(), Some("You have the dentist at 15:00."));
    assert_eq!(reply.modules, vec!["calendar".to_string()]);
    assert_eq!(reply.iterations, 2);
    assert_eq!(h.calendar_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.main.calls(), 3);

    // Triage offered exactly the two routing functions.
    assert_eq!(h.main.tool_names(0), vec!["select_module", "reset_conversation"]);
    // Execution offered the calendar's tools.
    assert_eq!(h.main.tool_names(1), vec!["list_events"]);

    let history = h.history.get("alice:web").unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(history[0].text(), "what is on my calendar today");
    assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
    assert!(history[2].text().contains("Dentist"));
    assert_eq!(history[3].text(), "You have the dentist at 15:00.");
}

const NOTES: &str = "id: notes
handler: builtin:calendar
provider: alpha
tools:
  - name: list_notes
    description: Notes
";

const RECIPES: &str = "id: recipes
handler: builtin:calendar
provider: beta
tools:
  - name: find_recipe
    description: Recipes
";

#[tokio::test]
async fn disagreeing_provider_overrides_use_default() {
    let main = ScriptedProvider::new(vec![Ok(select(&["notes", "recipes"])), Ok(stop("done"))]);
    let alpha = ScriptedProvider::new(vec![Ok(stop("from alpha"))]);
    let beta = ScriptedProvider::new(vec![Ok(stop("from beta"))]);
    let h = HarnessBuilder::new(main)
        .module("notes", NOTES)
        .module("recipes", RECIPES)
        .provider("alpha", alpha.clone())
        .provider("beta", beta.clone())
        .build()
        .await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "notes and recipes")).await;
    assert_eq!(reply.answer.as_deref(), Some("done"));
    assert_eq!(h.main.calls(), 2);
    assert_eq!(alpha.calls(), 0);
    assert_eq!(beta.calls(), 0);
}

#[tokio::test]
async fn single_provider_override_is_honoured() {
    let main = ScriptedProvider::new(vec![Ok(select(&["notes"]))]);
    let alpha = ScriptedProvider::new(vec![Ok(stop("from alpha"))]);
    let h = HarnessBuilder::new(main)
        .module("notes", NOTES)
        .module("recipes", RECIPES)
        .provider("alpha", alpha.clone())
        .build()
        .await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "my notes")).await;
    assert_eq!(reply.answer.as_deref(), Some("from alpha"));
    assert_eq!(h.main.calls(), 1);
    assert_eq!(alpha.calls(), 1);
}

const CLOCK: &str = "id: clock
handler: builtin:calendar
kind: core
tools:
  - name: get_time
    description: Current time
";

const EMPTY_CALENDAR: &str = "id: calendar
handler: builtin:calendar
description: The user's calendar
";

#[tokio::test]
async fn core_tools_do_not_hide_missing_capability() {
    let main = ScriptedProvider::new(vec![
        Ok(select(&["calendar"])),
        Ok(stop("I can't reach your calendar right now.")),
    ]);
    let h = HarnessBuilder::new(main)
        .module("clock", CLOCK)
        .module("calendar", EMPTY_CALENDAR)
        .build()
        .await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "what is on my calendar")).await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.modules, vec!["calendar".to_string()]);

    let sent = h.main.messages(1);
    assert_eq!(sent[0].text(), AgentDefaults::default().unavailable_persona);
    assert_eq!(h.main.tool_names(1), vec!["get_time"]);
    assert_eq!(h.history.get("alice:web").unwrap().len(), 2);
}

#[tokio::test]
async fn greeting_resets_history_and_archives_it() {
    let main = ScriptedProvider::new(vec![
        Ok(select(&["calendar"])),
        Ok(stop("Nothing today.")),
        Ok(tool_calls(vec![ToolCallRequest::new("r", "reset_conversation", json!({}))])),
    ]);
    let h = HarnessBuilder::new(main).module("calendar", CALENDAR_MANIFEST).build().await;
    let (tx, mut rx) = mpsc::channel(4);
    let kernel = h.kernel.with_archive(tx);

    kernel.handle(AgentRequest::new("alice", "web", "anything today?")).await;
    assert_eq!(h.history.get("alice:web").unwrap().len(), 2);

    let reply = kernel.handle(AgentRequest::new("alice", "web", "Salut")).await;
    assert_eq!(reply.status, ReplyStatus::Reset);
    assert_eq!(reply.answer.as_deref(), Some("Hi there!"));
    assert!(h.history.get("alice:web").unwrap().is_empty());
    assert_eq!(h.calendar_calls.load(Ordering::SeqCst), 0);
    // Triage only; no execution call after the reset.
    assert_eq!(h.main.calls(), 3);

    let archived = rx.recv().await.unwrap();
    assert_eq!(archived.user, "alice");
    assert_eq!(archived.messages.len(), 2);
}

#[tokio::test]
async fn endless_tool_calls_stop_at_iteration_bound() {
    let main = ScriptedProvider::repeating(vec![Ok(select(&["calendar"]))], list_events());
    let h = HarnessBuilder::new(main)
        .module("calendar", CALENDAR_MANIFEST)
        .max_iterations(3)
        .build()
        .await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "loop forever")).await;
    assert_eq!(reply.status, ReplyStatus::Error);
    assert_eq!(reply.error_kind.as_deref(), Some("schedule_error"));
    assert_eq!(reply.iterations, 3);
    assert_eq!(h.calendar_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.main.calls(), 4);
}

#[tokio::test]
async fn ephemeral_context_is_never_persisted() {
    let main = ScriptedProvider::new(vec![
        Ok(select(&["calendar"])),
        Ok(list_events()),
        Ok(stop("First answer.")),
        Ok(select(&[])),
        Ok(stop("Second answer.")),
    ]);
    let h = HarnessBuilder::new(main).module("calendar", CALENDAR_MANIFEST).build().await;

    h.kernel.handle(AgentRequest::new("alice", "web", "first")).await;
    h.kernel.handle(AgentRequest::new("alice", "web", "second")).await;

    let history = h.history.get("alice:web").unwrap();
    assert!(history.iter().all(|m| m.role != Role::System));
    assert_eq!(history.len(), 6);

    // The second execution call starts with fresh system messages, then the
    // persisted first turn, then the new user message.
    let sent = h.main.messages(4);
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[0].text(), "You are Home.");
    let first_user = sent.iter().position(|m| m.role == Role::User).unwrap();
    assert!(sent[..first_user].iter().all(|m| m.role == Role::System));
    assert_eq!(sent[first_user].text(), "first");
    assert_eq!(sent.last().unwrap().text(), "second");
}

#[tokio::test(start_paused = true)]
async fn transient_provider_failures_surface_after_three_attempts() {
    let failing = ScriptedProvider::new(vec![
        Err(Error::ProviderTransient("502".into())),
        Err(Error::ProviderTransient("502".into())),
        Err(Error::ProviderTransient("502".into())),
    ]);
    let h = HarnessBuilder::new(failing.clone())
        .module("calendar", CALENDAR_MANIFEST)
        .build()
        .await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "hello?")).await;
    assert_eq!(reply.status, ReplyStatus::Error);
    assert_eq!(reply.error_kind.as_deref(), Some("provider_error"));
    assert!(reply.retryable);
    assert_eq!(failing.calls(), 3);
}

#[tokio::test]
async fn malformed_arguments_are_fed_back() {
    let main = ScriptedProvider::new(vec![
        Ok(select(&["calendar"])),
        Ok(tool_calls(vec![ToolCallRequest {
            id: "bad".to_string(),
            name: "list_events".to_string(),
            arguments: "{day: today".to_string(),
        }])),
        Ok(list_events()),
        Ok(stop("Fixed it.")),
    ]);
    let h = HarnessBuilder::new(main).module("calendar", CALENDAR_MANIFEST).build().await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "today?")).await;
    assert_eq!(reply.answer.as_deref(), Some("Fixed it."));
    assert_eq!(reply.iterations, 3);
    assert_eq!(h.calendar_calls.load(Ordering::SeqCst), 1);

    let history = h.history.get("alice:web").unwrap();
    let bad_result = history
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("bad"))
        .unwrap();
    assert!(bad_result.text().contains("not valid JSON"));
}

#[tokio::test]
async fn unreachable_provider_is_terminal() {
    let main = ScriptedProvider::new(vec![Ok(select(&["calendar"])), Ok(list_events())]);
    let h = HarnessBuilder::new(main)
        .module("calendar", CALENDAR_MANIFEST)
        .unreachable()
        .build()
        .await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "today?")).await;
    assert_eq!(reply.error_kind.as_deref(), Some("connection_error"));
    assert!(reply.retryable);
    // The half-finished tool exchange is not persisted.
    assert!(h.history.get("alice:web").unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_request_runs_no_tools() {
    let main = ScriptedProvider::new(vec![Ok(select(&["calendar"])), Ok(list_events())]);
    let h = HarnessBuilder::new(main).module("calendar", CALENDAR_MANIFEST).build().await;
    let token = CancellationToken::new();
    token.cancel();

    let reply = h
        .kernel
        .handle(AgentRequest::new("alice", "web", "today?").with_cancel(token))
        .await;
    assert_eq!(reply.error_kind.as_deref(), Some("cancelled"));
    assert_eq!(h.calendar_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn no_modules_skips_triage() {
    let main = ScriptedProvider::new(vec![Ok(stop("Just chatting."))]);
    let h = HarnessBuilder::new(main).build().await;

    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "tell me a joke")).await;
    assert_eq!(reply.answer.as_deref(), Some("Just chatting."));
    assert_eq!(h.main.calls(), 1);
    assert!(h.main.tool_names(0).is_empty());
}

#[tokio::test]
async fn disabling_a_module_refreshes_the_next_request() {
    let main = ScriptedProvider::new(vec![
        Ok(select(&[])),
        Ok(stop("one")),
        Ok(stop("two")),
    ]);
    let h = HarnessBuilder::new(main).module("calendar", CALENDAR_MANIFEST).build().await;

    h.kernel.handle(AgentRequest::new("alice", "web", "first")).await;
    assert_eq!(h.main.calls(), 2);

    h.registry.set_enabled(&Scope::Shared, "calendar", false).await.unwrap();
    let reply = h.kernel.handle(AgentRequest::new("alice", "web", "second")).await;
    assert_eq!(reply.answer.as_deref(), Some("two"));
    // Nothing left to choose from, so triage made no call.
    assert_eq!(h.main.calls(), 3);
}
