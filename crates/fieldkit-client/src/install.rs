//! The deferred install prompt.
//!
//! The host hands over a one-shot capability when install criteria are met.
//! It is held until the user asks to install, then consumed. Nothing here is
//! persisted: a reload starts with an empty slot.

use std::fmt;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tracing::{debug, info};

/// The user's answer to the native install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    Accepted,
    Dismissed,
}

/// Host-provided deferred prompt.
pub trait DeferredPrompt: Send {
    /// Show the native prompt and wait for the choice.
    fn prompt(self: Box<Self>) -> BoxFuture<'static, PromptChoice>;
}

/// A captured, not yet used, install prompt.
pub struct InstallCapability(Box<dyn DeferredPrompt>);

impl InstallCapability {
    pub fn new(prompt: impl DeferredPrompt + 'static) -> Self {
        Self(Box::new(prompt))
    }

    /// Show the prompt. Consumes the capability.
    pub async fn prompt(self) -> PromptChoice {
        self.0.prompt().await
    }
}

impl fmt::Debug for InstallCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstallCapability")
    }
}

/// Result of an install request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Accepted,
    Dismissed,
    /// No capability was held; nothing was shown.
    Unavailable,
}

/// Holds at most one capability.
#[derive(Debug, Default)]
pub struct InstallPromptSlot {
    slot: Mutex<Option<InstallCapability>>,
}

impl InstallPromptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly captured capability, replacing any older one.
    pub fn capture(&self, capability: InstallCapability) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.replace(capability).is_some() {
                debug!("Replaced an unused install prompt");
            } else {
                info!("Install prompt captured");
            }
        }
    }

    /// Take the capability out; the slot is empty afterwards.
    pub fn take(&self) -> Option<InstallCapability> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Drop the capability without using it.
    pub fn discard(&self) {
        if self.take().is_some() {
            debug!("Install prompt discarded");
        }
    }

    pub fn is_available(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Answers with a fixed choice and counts how often it was shown.
    pub(crate) struct FixedPrompt {
        pub choice: PromptChoice,
        pub shown: Arc<AtomicUsize>,
    }

    impl DeferredPrompt for FixedPrompt {
        fn prompt(self: Box<Self>) -> BoxFuture<'static, PromptChoice> {
            self.shown.fetch_add(1, Ordering::SeqCst);
            let choice = self.choice;
            async move { choice }.boxed()
        }
    }

    #[tokio::test]
    async fn test_slot_is_single_use() {
        let shown = Arc::new(AtomicUsize::new(0));
        let slot = InstallPromptSlot::new();
        slot.capture(InstallCapability::new(FixedPrompt {
            choice: PromptChoice::Accepted,
            shown: Arc::clone(&shown),
        }));
        assert!(slot.is_available());

        let capability = slot.take().unwrap();
        assert_eq!(capability.prompt().await, PromptChoice::Accepted);
        assert!(slot.take().is_none());
        assert!(!slot.is_available());
        assert_eq!(shown.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discard() {
        let slot = InstallPromptSlot::new();
        slot.capture(InstallCapability::new(FixedPrompt {
            choice: PromptChoice::Dismissed,
            shown: Arc::new(AtomicUsize::new(0)),
        }));
        slot.discard();
        assert!(!slot.is_available());
    }
}
