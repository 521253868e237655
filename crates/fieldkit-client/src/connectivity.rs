//! Online/offline observation, independent of the worker.

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::UserNotice;

/// Derived connectivity flag fed by host connectivity events.
pub struct Connectivity {
    online: watch::Sender<bool>,
    notices: broadcast::Sender<UserNotice>,
}

impl Connectivity {
    pub fn new(initially_online: bool, notices: broadcast::Sender<UserNotice>) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online, notices }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Record a connectivity event. Notices fire only on transitions.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if !changed {
            return;
        }

        info!(online, "Connectivity changed");
        let notice = if online {
            UserNotice::BackOnline
        } else {
            UserNotice::Offline
        };
        let _ = self.notices.send(notice);
    }
}
