//! Push events and notification clicks.

use std::sync::atomic::{AtomicU64, Ordering};

use fieldkit_core::NotificationConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientMatchOptions, ClientType, Clients};
use crate::lifecycle::ServiceWorkerId;

/// Action identifier that opens the dashboard.
pub const ACTION_OPEN: &str = "open";
/// Action identifier that only dismisses.
pub const ACTION_CLOSE: &str = "close";

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// An OS notification raised by a push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    /// Page opened on click.
    pub url: Url,
}

impl Notification {
    /// Build the notification for a push payload. Absent, empty and
    /// non-UTF-8 payloads all still produce a notification.
    pub fn from_push(config: &NotificationConfig, dashboard: &Url, payload: Option<&[u8]>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let body = payload
            .map(String::from_utf8_lossy)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| config.default_body.clone());

        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: "Close".to_string(),
                },
            ],
            url: dashboard.clone(),
        }
    }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window was focused and navigated to the dashboard.
    Focused { client_id: String },
    /// A new window was opened.
    Opened { client_id: String },
    /// Closed without opening anything.
    Dismissed,
}

/// Route a click. The notification is already closed by the caller.
/// `None` and [`ACTION_OPEN`] open the dashboard; every other action only
/// dismisses.
///
/// A window already controlled by `controller` is preferred, then any
/// same-origin window. Whichever window shows the dashboard is handed to
/// `controller`, the active worker for the dashboard URL.
pub fn route_click(
    notification: &Notification,
    action: Option<&str>,
    clients: &mut Clients,
    controller: Option<ServiceWorkerId>,
) -> ClickOutcome {
    match action {
        None | Some(ACTION_OPEN) => {}
        Some(other) => {
            debug!(id = notification.id, action = other, "Notification dismissed");
            return ClickOutcome::Dismissed;
        }
    }

    let target = &notification.url;
    let options = ClientMatchOptions {
        include_uncontrolled: true,
        client_type: ClientType::Window,
    };
    let existing = {
        let windows: Vec<_> = clients
            .match_all(&options)
            .into_iter()
            .filter(|c| c.url.origin() == target.origin())
            .collect();
        windows
            .iter()
            .find(|c| controller.is_some() && c.controller == controller)
            .or_else(|| windows.first())
            .map(|c| c.id.clone())
    };

    if let Some(id) = existing {
        if let Some(client) = clients.get_mut(&id) {
            if client.navigate(target.clone()).and_then(|_| client.focus()).is_ok() {
                client.controller = controller;
                info!(client = %id, url = %target, "Focused existing window");
                return ClickOutcome::Focused { client_id: id };
            }
        }
    }

    let client_id = clients.open_window(target.clone()).id;
    if let Some(client) = clients.get_mut(&client_id) {
        client.controller = controller;
    }
    info!(client = %client_id, url = %target, "Opened window from notification");
    ClickOutcome::Opened { client_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard() -> Url {
        Url::parse("https://app.example.com/dashboard").unwrap()
    }

    #[test]
    fn test_payload_text_used_as_body() {
        let n = Notification::from_push(
            &NotificationConfig::default(),
            &dashboard(),
            Some(b"Ticket #42 assigned"),
        );
        assert_eq!(n.body, "Ticket #42 assigned");
        assert_eq!(n.title, "FieldKit");
        assert_eq!(n.vibrate, vec![100, 50, 100]);
        let actions: Vec<_> = n.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec![ACTION_OPEN, ACTION_CLOSE]);
    }

    #[test]
    fn test_absent_or_malformed_payload_uses_default() {
        let config = NotificationConfig::default();
        let absent = Notification::from_push(&config, &dashboard(), None);
        let empty = Notification::from_push(&config, &dashboard(), Some(b"  "));
        assert_eq!(absent.body, config.default_body);
        assert_eq!(empty.body, config.default_body);

        let garbled = Notification::from_push(&config, &dashboard(), Some(&[0xff, b'h', b'i']));
        assert!(garbled.body.ends_with("hi"));
    }

    #[test]
    fn test_every_push_is_distinct() {
        let config = NotificationConfig::default();
        let a = Notification::from_push(&config, &dashboard(), Some(b"same"));
        let b = Notification::from_push(&config, &dashboard(), Some(b"same"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_click_opens_window_when_none_exists() {
        let mut clients = Clients::new();
        let n = Notification::from_push(&NotificationConfig::default(), &dashboard(), None);

        let main_worker = ServiceWorkerId::for_tests(5);

        let outcome = route_click(&n, None, &mut clients, Some(main_worker));
        let ClickOutcome::Opened { client_id } = outcome else {
            panic!("expected a new window");
        };
        let opened = clients.get(&client_id).unwrap();
        assert_eq!(opened.url, dashboard());
        assert_eq!(opened.controller, Some(main_worker));
    }

    #[test]
    fn test_click_reuses_existing_window() {
        let mut clients = Clients::new();
        let existing = clients.open_window(Url::parse("https://app.example.com/tickets").unwrap());
        let n = Notification::from_push(&NotificationConfig::default(), &dashboard(), None);

        let outcome = route_click(&n, Some(ACTION_OPEN), &mut clients, None);
        assert_eq!(outcome, ClickOutcome::Focused { client_id: existing.id.clone() });
        assert_eq!(clients.get(&existing.id).unwrap().url, dashboard());
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_click_prefers_window_of_dashboard_worker() {
        let mut clients = Clients::new();
        let portal = clients.open_window(Url::parse("https://app.example.com/portal/home").unwrap());
        let main = clients.open_window(Url::parse("https://app.example.com/tickets").unwrap());
        let portal_worker = ServiceWorkerId::for_tests(1);
        let main_worker = ServiceWorkerId::for_tests(2);
        clients.get_mut(&portal.id).unwrap().controller = Some(portal_worker);
        clients.get_mut(&main.id).unwrap().controller = Some(main_worker);
        let n = Notification::from_push(&NotificationConfig::default(), &dashboard(), None);

        let outcome = route_click(&n, None, &mut clients, Some(main_worker));
        assert_eq!(outcome, ClickOutcome::Focused { client_id: main.id.clone() });
        assert_eq!(clients.get(&portal.id).unwrap().url.path(), "/portal/home");
    }

    #[test]
    fn test_reused_window_is_handed_to_dashboard_worker() {
        let mut clients = Clients::new();
        let portal = clients.open_window(Url::parse("https://app.example.com/portal/home").unwrap());
        let portal_worker = ServiceWorkerId::for_tests(1);
        let main_worker = ServiceWorkerId::for_tests(2);
        clients.get_mut(&portal.id).unwrap().controller = Some(portal_worker);
        let n = Notification::from_push(&NotificationConfig::default(), &dashboard(), None);

        route_click(&n, None, &mut clients, Some(main_worker));
        let reused = clients.get(&portal.id).unwrap();
        assert_eq!(reused.url, dashboard());
        assert_eq!(reused.controller, Some(main_worker));
    }

    #[test]
    fn test_close_action_dismisses() {
        let mut clients = Clients::new();
        let n = Notification::from_push(&NotificationConfig::default(), &dashboard(), None);
        assert_eq!(route_click(&n, Some(ACTION_CLOSE), &mut clients, None), ClickOutcome::Dismissed);
        assert!(clients.is_empty());
    }
}
