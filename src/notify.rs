use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use std::sync::Arc;

use crate::fetch::{ApiClient, FetchError};
use crate::pages::PageRegistry;
use crate::ports::{HttpClient, Notifier, Reporter};
use crate::schedule::ScheduleEntry;
use crate::types::{NotificationAction, NotificationDisplay};

pub const TOGGLE_ACTION: &str = "toggle-status";
pub const CLOSE_ACTION: &str = "close";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStatus {
    pub name: String,
    pub status: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickData {
    pub participant_id: i64,
    pub current_status: bool,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, PartialEq)]
pub enum ClickOutcome {
    Toggled { success: bool },
    Focused,
    Dismissed,
}

#[derive(Debug)]
pub enum PresentError {
    Fetch(FetchError),
    Notify(String),
    BadClickData(String),
}

impl std::fmt::Display for PresentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresentError::Fetch(err) => write!(f, "{err}"),
            PresentError::Notify(err) => write!(f, "notification not shown: {err}"),
            PresentError::BadClickData(err) => write!(f, "malformed click data: {err}"),
        }
    }
}

impl From<FetchError> for PresentError {
    fn from(err: FetchError) -> Self {
        PresentError::Fetch(err)
    }
}

fn status_word(status: bool) -> &'static str {
    if status { "angemeldet" } else { "abgemeldet" }
}

fn iso_date(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        now.year(),
        u8::from(now.month()),
        now.day()
    )
}

/// Renders reminders and status-change results, and reacts to
/// notification-button clicks.
#[derive(Clone)]
pub struct Presenter<C, N> {
    api: ApiClient<C>,
    notifier: N,
    pages: PageRegistry,
    app_name: String,
    reporter: Arc<dyn Reporter>,
}

impl<C: HttpClient, N: Notifier> Presenter<C, N> {
    pub fn new(
        api: ApiClient<C>,
        notifier: N,
        pages: PageRegistry,
        app_name: String,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            api,
            notifier,
            pages,
            app_name,
            reporter,
        }
    }

    /// Fetches the participant's current status and renders the
    /// reminder with a toggle action and a dismiss action.
    pub async fn present_reminder(
        &self,
        entry: &ScheduleEntry,
        now: OffsetDateTime,
    ) -> Result<(), PresentError> {
        let status: ParticipantStatus = self
            .api
            .get_json(&format!(
                "/api/notifications/participant-status/{}",
                entry.participant_id
            ))
            .await?;

        let body = if entry.trigger_label.is_empty() {
            format!("{} ist heute {}.", status.name, status_word(status.status))
        } else {
            format!(
                "{} ist heute {} (Bus um {}).",
                status.name,
                status_word(status.status),
                entry.trigger_label
            )
        };
        let toggle_title = if status.status { "Abmelden" } else { "Anmelden" };
        let display = NotificationDisplay {
            title: self.app_name.clone(),
            body,
            tag: entry.id.clone(),
            data: json!({
                "participantId": entry.participant_id,
                "currentStatus": status.status,
                "date": iso_date(now),
                "name": status.name,
            }),
            actions: vec![
                NotificationAction {
                    action: TOGGLE_ACTION.to_string(),
                    title: toggle_title.to_string(),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_string(),
                    title: "OK".to_string(),
                },
            ],
            require_interaction: true,
        };
        self.notifier
            .present(&display)
            .await
            .map_err(|err| PresentError::Notify(err.to_string()))
    }

    pub async fn withdraw(&self, tag: &str) {
        if let Err(err) = self.notifier.close(tag).await {
            self.reporter.report("notification-close", &err);
        }
    }

    /// Notification click dispatch. The toggle action issues exactly
    /// one PATCH flipping the status for the given date, asks the
    /// server to recompute derived state, and answers with a result
    /// notification; a body click focuses or opens the app window.
    pub async fn on_notification_click(
        &self,
        action: &str,
        data: serde_json::Value,
        now: OffsetDateTime,
    ) -> Result<ClickOutcome, PresentError> {
        match action {
            TOGGLE_ACTION => {
                let data: ClickData = serde_json::from_value(data)
                    .map_err(|err| PresentError::BadClickData(err.to_string()))?;
                self.toggle_status(data, now).await
            }
            "" => {
                self.pages.focus("/");
                Ok(ClickOutcome::Focused)
            }
            _ => Ok(ClickOutcome::Dismissed),
        }
    }

    async fn toggle_status(
        &self,
        data: ClickData,
        now: OffsetDateTime,
    ) -> Result<ClickOutcome, PresentError> {
        let date = data.date.clone().unwrap_or_else(|| iso_date(now));
        let new_status = !data.current_status;
        let patched = self
            .api
            .send_json(
                axum::http::Method::PATCH,
                &format!("/api/participation/{}", data.participant_id),
                &json!({ "date": date, "status": new_status }),
            )
            .await;

        let success = match patched {
            Ok(_) => {
                // Derived state (daily overview, companion counts) is
                // recomputed server-side; failure there does not undo
                // the toggle.
                if let Err(err) = self
                    .api
                    .send_json(axum::http::Method::POST, "/api/trigger-update", &json!({}))
                    .await
                {
                    self.reporter.report("trigger-update", &err);
                }
                true
            }
            Err(err) => {
                self.reporter.report("toggle-status", &err);
                false
            }
        };

        let body = if success {
            format!("{} wurde {}.", data.name, status_word(new_status))
        } else {
            format!(
                "Statusänderung für {} fehlgeschlagen. Bitte ändere den Status manuell in der App.",
                data.name
            )
        };
        let display = NotificationDisplay {
            title: self.app_name.clone(),
            body,
            tag: format!("toggle-result-{}", data.participant_id),
            data: serde_json::Value::Null,
            actions: Vec::new(),
            require_interaction: false,
        };
        self.notifier
            .present(&display)
            .await
            .map_err(|err| PresentError::Notify(err.to_string()))?;
        Ok(ClickOutcome::Toggled { success })
    }
}

/// Push payloads are JSON notification descriptions; anything that does
/// not parse degrades to a plain-text notification instead of being
/// dropped.
pub fn parse_push_payload(data: &[u8], fallback_title: &str) -> NotificationDisplay {
    match serde_json::from_slice::<NotificationDisplay>(data) {
        Ok(display) if !display.title.is_empty() => display,
        _ => NotificationDisplay {
            title: fallback_title.to_string(),
            body: String::from_utf8_lossy(data).into_owned(),
            tag: String::new(),
            data: serde_json::Value::Null,
            actions: Vec::new(),
            require_interaction: false,
        },
    }
}
