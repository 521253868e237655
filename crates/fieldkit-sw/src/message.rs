//! Page-to-worker control messages.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A recognised control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Delete every cache bucket.
    ClearCache,
}

impl ControlMessage {
    /// Parse message data. Anything unrecognised yields `None` and is ignored.
    pub fn parse(data: &str) -> Option<Self> {
        match serde_json::from_str(data) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognised message");
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        match self {
            ControlMessage::SkipWaiting => r#"{"type":"SKIP_WAITING"}"#.to_string(),
            ControlMessage::ClearCache => r#"{"type":"CLEAR_CACHE"}"#.to_string(),
        }
    }
}

/// Which worker of a registration a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Waiting,
    Active,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#),
            Some(ControlMessage::SkipWaiting)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"CLEAR_CACHE","extra":1}"#),
            Some(ControlMessage::ClearCache)
        );
    }

    #[test]
    fn test_unknown_messages_ignored() {
        assert_eq!(ControlMessage::parse(r#"{"type":"PING"}"#), None);
        assert_eq!(ControlMessage::parse("SKIP_WAITING"), None);
        assert_eq!(ControlMessage::parse(""), None);
    }

    #[test]
    fn test_to_json_parses_back() {
        let json = ControlMessage::SkipWaiting.to_json();
        assert_eq!(ControlMessage::parse(&json), Some(ControlMessage::SkipWaiting));
    }
}
