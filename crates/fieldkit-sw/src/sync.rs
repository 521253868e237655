//! Background sync.
//!
//! The event is accepted and logged. Nothing is queued or replayed: writes
//! made while offline are not retried here.

use tracing::info;

/// Result of a sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Handled with nothing to do.
    Idle { tag: String },
    /// The worker's policy does not handle sync.
    Unsupported,
}

pub fn handle_sync(tag: &str) -> SyncOutcome {
    info!(tag, "Background sync fired");
    SyncOutcome::Idle {
        tag: tag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_is_a_noop() {
        assert_eq!(
            handle_sync("ticket-outbox"),
            SyncOutcome::Idle {
                tag: "ticket-outbox".to_string()
            }
        );
    }
}
