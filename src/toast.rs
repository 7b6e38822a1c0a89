use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ClientError;

pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// A notification shown until it expires or is dismissed. A `None`
/// duration never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub duration: Option<Duration>,
    created_at: Instant,
}

impl Toast {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.duration {
            Some(d) => now.saturating_duration_since(self.created_at) >= d,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastEvent {
    Shown(Toast),
    Dismissed(Uuid),
}

/// Collects toasts from anywhere in the client for a container to render.
pub struct ToastCenter {
    toasts: Mutex<Vec<Toast>>,
    events: broadcast::Sender<ToastEvent>,
}

impl Default for ToastCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl ToastCenter {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            toasts: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn show(
        &self,
        title: impl Into<String>,
        description: Option<String>,
        severity: Severity,
        duration: Option<Duration>,
    ) -> Uuid {
        let toast = Toast {
            id: Uuid::new_v4(),
            title: title.into(),
            description,
            severity,
            duration,
            created_at: Instant::now(),
        };
        let id = toast.id;
        self.lock().push(toast.clone());
        let _ = self.events.send(ToastEvent::Shown(toast));
        id
    }

    pub fn success(&self, title: impl Into<String>, description: impl Into<String>) -> Uuid {
        self.show(title, Some(description.into()), Severity::Success, Some(DEFAULT_TOAST_DURATION))
    }

    pub fn info(&self, title: impl Into<String>, description: impl Into<String>) -> Uuid {
        self.show(title, Some(description.into()), Severity::Info, Some(DEFAULT_TOAST_DURATION))
    }

    pub fn warning(&self, title: impl Into<String>, description: impl Into<String>) -> Uuid {
        self.show(title, Some(description.into()), Severity::Warning, Some(DEFAULT_TOAST_DURATION))
    }

    pub fn error(&self, title: impl Into<String>, description: impl Into<String>) -> Uuid {
        self.show(title, Some(description.into()), Severity::Error, Some(DEFAULT_TOAST_DURATION))
    }

    /// Surface a failed call to the user. Session errors get a dedicated
    /// message; everything else is reported generically.
    pub fn notify_error(&self, err: &ClientError) -> Uuid {
        if err.is_auth() {
            return self.error("Session expired", "Please sign in again.");
        }
        match err {
            ClientError::Http { status, .. } if *status >= 500 => {
                self.error("Server error", "The server could not complete the request. Please try again.")
            }
            ClientError::Transport(_) => {
                self.error("Connection problem", "Check your network connection and try again.")
            }
            _ => self.error("Something went wrong", "Please try again."),
        }
    }

    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut toasts = self.lock();
        let before = toasts.len();
        toasts.retain(|t| t.id != id);
        let removed = toasts.len() != before;
        drop(toasts);
        if removed {
            let _ = self.events.send(ToastEvent::Dismissed(id));
        }
        removed
    }

    /// Toasts still on screen, oldest first.
    pub fn active(&self) -> Vec<Toast> {
        self.active_at(Instant::now())
    }

    pub fn active_at(&self, now: Instant) -> Vec<Toast> {
        self.lock()
            .iter()
            .filter(|t| !t.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Drop expired toasts. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut toasts = self.lock();
        let before = toasts.len();
        toasts.retain(|t| !t.is_expired_at(now));
        before - toasts.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Toast>> {
        self.toasts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_and_dismiss() {
        let center = ToastCenter::new();
        let mut events = center.subscribe();

        let id = center.success("Saved", "Library updated");
        let active = center.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Success);
        assert_eq!(active[0].description.as_deref(), Some("Library updated"));
        assert!(matches!(events.try_recv().unwrap(), ToastEvent::Shown(t) if t.id == id));

        assert!(center.dismiss(id));
        assert!(!center.dismiss(id));
        assert!(center.active().is_empty());
        assert_eq!(events.try_recv().unwrap(), ToastEvent::Dismissed(id));
    }

    #[test]
    fn test_expiry() {
        let center = ToastCenter::new();
        center.show("Short", None, Severity::Info, Some(Duration::from_millis(100)));
        center.show("Sticky", None, Severity::Warning, None);

        let later = Instant::now() + Duration::from_secs(1);
        let active = center.active_at(later);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Sticky");
    }

    #[test]
    fn test_prune_expired() {
        let center = ToastCenter::new();
        center.show("Gone", None, Severity::Info, Some(Duration::ZERO));
        center.show("Stays", None, Severity::Info, Some(Duration::from_secs(60)));
        assert_eq!(center.prune_expired(), 1);
        assert_eq!(center.active().len(), 1);
    }

    #[test]
    fn test_notify_error_messages() {
        let center = ToastCenter::new();
        center.notify_error(&ClientError::SessionExpired);
        center.notify_error(&ClientError::Http {
            status: 503,
            message: "unavailable".into(),
        });
        center.notify_error(&ClientError::Transport("refused".into()));
        center.notify_error(&ClientError::Http {
            status: 422,
            message: "bad".into(),
        });

        let titles: Vec<String> = center.active().into_iter().map(|t| t.title).collect();
        assert_eq!(
            titles,
            ["Session expired", "Server error", "Connection problem", "Something went wrong"]
        );
        assert!(center.active().iter().all(|t| t.severity == Severity::Error));
    }
}
