//! Notifier: event-indexed rich message templates delivered
//! to a webhook, filtered by a configured notification level. A variant
//! attaches a file (the current log, for `critical-error`) as a multipart
//! upload.
//!
//! Implements [`orch_core::events::EventSink`] so it registers on the same
//! [`orch_core::events::EventBus`] as every other event consumer, per the
//! a construct-once, inject-by-reference lifetime.

use std::path::Path;
use std::sync::Arc;

use orch_core::config::NotificationLevel;
use orch_core::events::{EventSink, OrchestrationEvent};
use serde::Serialize;
use tracing::warn;

/// A rendered notification, independent of delivery mechanism.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub title: String,
    pub body: String,
    /// Hex color, e.g. `"#e74c3c"` for an error-toned event.
    pub color: &'static str,
    pub url: Option<String>,
}

/// Renders an [`OrchestrationEvent`] into a [`Message`] using a fixed,
/// event-indexed template table.
pub fn render(event: &OrchestrationEvent) -> Message {
    match event {
        OrchestrationEvent::PlanningComplete { ticket_id } => Message {
            title: "Planning complete".into(),
            body: format!("Issue #{ticket_id}: specification and plan are ready for approval."),
            color: "#3498db",
            url: None,
        },
        OrchestrationEvent::TaskCompleted { ticket_id, sub_ticket } => Message {
            title: "Task completed".into(),
            body: format!("Issue #{ticket_id}: sub-ticket #{sub_ticket} finished."),
            color: "#2ecc71",
            url: None,
        },
        OrchestrationEvent::CriticalError { ticket_id, message, log_path: _ } => Message {
            title: "Critical error".into(),
            body: format!("Issue #{ticket_id}: {message}"),
            color: "#e74c3c",
            url: None,
        },
        OrchestrationEvent::TestFailed { ticket_id, test_sub_ticket } => Message {
            title: "Test failed".into(),
            body: format!("Issue #{ticket_id}: test #{test_sub_ticket} failed, entering self-heal."),
            color: "#e67e22",
            url: None,
        },
        OrchestrationEvent::TestFixStarted { ticket_id, test_sub_ticket, fix_sub_ticket, attempt } => Message {
            title: "Fix attempt started".into(),
            body: format!(
                "Issue #{ticket_id}: fix #{fix_sub_ticket} (attempt {attempt}) for test #{test_sub_ticket}."
            ),
            color: "#f39c12",
            url: None,
        },
        OrchestrationEvent::TestFixCompleted { ticket_id, test_sub_ticket, fix_sub_ticket, attempt, passed } => {
            Message {
                title: "Fix attempt completed".into(),
                body: format!(
                    "Issue #{ticket_id}: fix #{fix_sub_ticket} (attempt {attempt}) for test #{test_sub_ticket} \
                     {}.",
                    if *passed { "passed" } else { "did not pass" }
                ),
                color: if *passed { "#2ecc71" } else { "#e67e22" },
                url: None,
            }
        }
        OrchestrationEvent::TestPassedAfterFix { ticket_id, test_sub_ticket, attempt } => Message {
            title: "Test passed after fix".into(),
            body: format!("Issue #{ticket_id}: test #{test_sub_ticket} passed on attempt {attempt}."),
            color: "#2ecc71",
            url: None,
        },
        OrchestrationEvent::TestMaxAttemptsReached { ticket_id, test_sub_ticket } => Message {
            title: "Test exhausted fix attempts".into(),
            body: format!("Issue #{ticket_id}: test #{test_sub_ticket} did not pass after 10 fix attempts."),
            color: "#e74c3c",
            url: None,
        },
        OrchestrationEvent::OrchestrationComplete { ticket_id, pull_request_url } => Message {
            title: "Orchestration complete".into(),
            body: format!("Issue #{ticket_id}: change request opened."),
            color: "#2ecc71",
            url: Some(pull_request_url.clone()),
        },
        OrchestrationEvent::OrchestrationFailed { ticket_id, reason } => Message {
            title: "Orchestration failed".into(),
            body: format!("Issue #{ticket_id}: {reason}"),
            color: "#e74c3c",
            url: None,
        },
        OrchestrationEvent::ModelFailover { agent, from, to, reason } => Message {
            title: "Model failover".into(),
            body: format!("Agent \"{agent}\" failed over from {from} to {to}: {reason}"),
            color: "#9b59b6",
            url: None,
        },
    }
}

/// Whether `event`'s kind should be delivered at the given filter level.
pub fn passes_filter(level: NotificationLevel, event: &OrchestrationEvent) -> bool {
    let errors_only = matches!(
        event,
        OrchestrationEvent::CriticalError { .. }
            | OrchestrationEvent::OrchestrationFailed { .. }
            | OrchestrationEvent::TestMaxAttemptsReached { .. }
    );
    let stage_transition = errors_only
        || matches!(
            event,
            OrchestrationEvent::PlanningComplete { .. }
                | OrchestrationEvent::OrchestrationComplete { .. }
                | OrchestrationEvent::TestPassedAfterFix { .. }
        );

    match level {
        NotificationLevel::ErrorsOnly => errors_only,
        NotificationLevel::StageTransitions => stage_transition,
        NotificationLevel::AllMajorEvents => true,
    }
}

/// Webhook payload shape: a generic rich-message body plus the mentions
/// configured for this deployment.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    text: &'a str,
    color: &'a str,
    url: Option<&'a str>,
    mentions: &'a [String],
}

/// Delivers rendered messages to a configured webhook URL, filtering by
/// [`NotificationLevel`]. Delivery failures are logged and never
/// propagated.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    level: NotificationLevel,
    mention_roles: Vec<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>, level: NotificationLevel, mention_roles: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::new(),
            webhook_url,
            level,
            mention_roles,
        })
    }

    /// Render, filter, and deliver `event` as a plain JSON POST.
    pub async fn notify(&self, event: &OrchestrationEvent) {
        if !passes_filter(self.level, event) {
            return;
        }
        let Some(url) = &self.webhook_url else {
            return;
        };
        let message = render(event);
        let payload = WebhookPayload {
            title: &message.title,
            text: &message.body,
            color: message.color,
            url: message.url.as_deref(),
            mentions: &self.mention_roles,
        };

        if let Err(err) = self.client.post(url).json(&payload).send().await {
            warn!(error = %err, kind = event.kind(), "notifier delivery failed");
        }
    }

    /// Deliver `event` with `file_path` attached as a multipart upload,
    /// used for `critical-error` with the current log file.
    pub async fn notify_with_attachment(&self, event: &OrchestrationEvent, file_path: &Path) {
        if !passes_filter(self.level, event) {
            return;
        }
        let Some(url) = &self.webhook_url else {
            return;
        };
        let message = render(event);

        let file_bytes = match tokio::fs::read(file_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, path = %file_path.display(), "failed to read attachment for notifier");
                self.notify(event).await;
                return;
            }
        };

        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log.txt".to_string());

        let part = reqwest::multipart::Part::bytes(file_bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("title", message.title.clone())
            .text("text", message.body.clone())
            .text("color", message.color)
            .part("attachment", part);

        if let Err(err) = self.client.post(url).multipart(form).send().await {
            warn!(error = %err, kind = event.kind(), "notifier attachment delivery failed");
        }
    }
}

impl EventSink for Notifier {
    fn on_event(&self, event: &OrchestrationEvent) {
        if !passes_filter(self.level, event) {
            return;
        }

        // `EventSink::on_event` is synchronous; reqwest's async client needs a runtime, so delivery is
        // spawned rather than awaited inline.
        let log_path = match event {
            OrchestrationEvent::CriticalError { log_path, .. } => log_path.clone(),
            _ => None,
        };
        let event = event.clone();
        let this = self.clone_handle();
        tokio::spawn(async move {
            match log_path {
                Some(path) => this.notify_with_attachment(&event, Path::new(&path)).await,
                None => this.notify(&event).await,
            }
        });
    }
}

impl Notifier {
    /// Cheap handle clone for use inside the spawned delivery task; every
    /// field is either `Clone` or behind a client that is itself cheap to
    /// clone (`reqwest::Client` is an `Arc` internally).
    fn clone_handle(&self) -> Arc<Self> {
        Arc::new(Self {
            client: self.client.clone(),
            webhook_url: self.webhook_url.clone(),
            level: self.level,
            mention_roles: self.mention_roles.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_only_admits_only_error_kinds() {
        let critical = OrchestrationEvent::CriticalError { ticket_id: 1, message: "boom".into(), log_path: None };
        let planning = OrchestrationEvent::PlanningComplete { ticket_id: 1 };
        assert!(passes_filter(NotificationLevel::ErrorsOnly, &critical));
        assert!(!passes_filter(NotificationLevel::ErrorsOnly, &planning));
    }

    #[test]
    fn stage_transitions_admits_errors_and_major_transitions_but_not_task_completed() {
        let task = OrchestrationEvent::TaskCompleted { ticket_id: 1, sub_ticket: 2 };
        let complete = OrchestrationEvent::OrchestrationComplete {
            ticket_id: 1,
            pull_request_url: "https://example.com/pr/1".into(),
        };
        assert!(!passes_filter(NotificationLevel::StageTransitions, &task));
        assert!(passes_filter(NotificationLevel::StageTransitions, &complete));
    }

    #[test]
    fn all_major_events_admits_everything() {
        let task = OrchestrationEvent::TaskCompleted { ticket_id: 1, sub_ticket: 2 };
        assert!(passes_filter(NotificationLevel::AllMajorEvents, &task));
    }

    #[test]
    fn render_carries_pull_request_url_on_completion() {
        let event = OrchestrationEvent::OrchestrationComplete {
            ticket_id: 9,
            pull_request_url: "https://example.com/pr/9".into(),
        };
        let message = render(&event);
        assert_eq!(message.url.as_deref(), Some("https://example.com/pr/9"));
    }

    #[tokio::test]
    async fn notify_without_a_webhook_url_is_a_silent_noop() {
        let notifier = Notifier::new(None, NotificationLevel::AllMajorEvents, vec![]);
        notifier.notify(&OrchestrationEvent::PlanningComplete { ticket_id: 1 }).await;
    }

    #[tokio::test]
    async fn notify_delivers_json_payload_to_webhook() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            Some(format!("{}/hook", server.uri())),
            NotificationLevel::AllMajorEvents,
            vec!["@oncall".into()],
        );
        notifier.notify(&OrchestrationEvent::PlanningComplete { ticket_id: 1 }).await;
    }
}
