//! Soft install banner and iOS instructions.

use std::sync::atomic::{AtomicBool, Ordering};

use fieldkit_common::SharedClock;
use fieldkit_core::BannerSuppression;
use tracing::debug;

use crate::platform::Environment;
use crate::storage::InstallPreferences;
use crate::ClientError;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Which install affordance to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    /// A button that triggers the captured native prompt.
    NativePrompt,
    /// Manual "Add to Home Screen" steps for iOS Safari.
    IosInstructions,
}

/// Decides whether the install banner is shown on one surface.
pub struct InstallBanner {
    suppression: BannerSuppression,
    prefs: InstallPreferences,
    clock: SharedClock,
    dismissed_this_session: AtomicBool,
}

impl InstallBanner {
    pub fn new(suppression: BannerSuppression, prefs: InstallPreferences, clock: SharedClock) -> Self {
        Self {
            suppression,
            prefs,
            clock,
            dismissed_this_session: AtomicBool::new(false),
        }
    }

    /// Whether a previous dismissal still hides the banner.
    pub fn is_suppressed(&self) -> Result<bool, ClientError> {
        if self.dismissed_this_session.load(Ordering::SeqCst) {
            return Ok(true);
        }
        match self.suppression {
            BannerSuppression::Session => Ok(false),
            BannerSuppression::Days { days } => {
                let Some(at) = self.prefs.dismissed_at()? else {
                    return Ok(false);
                };
                let elapsed = self.clock.now_millis() - at;
                Ok(elapsed < i64::from(days) * DAY_MILLIS)
            }
        }
    }

    /// Hide the banner for the configured window.
    pub fn dismiss(&self) -> Result<(), ClientError> {
        self.dismissed_this_session.store(true, Ordering::SeqCst);
        if let BannerSuppression::Days { days } = self.suppression {
            self.prefs.record_dismissal(self.clock.now_millis())?;
            debug!(days, "Install banner dismissed");
        }
        Ok(())
    }

    /// The banner to show, if any.
    pub fn banner(&self, env: &Environment, capability_available: bool) -> Result<Option<BannerKind>, ClientError> {
        if env.is_standalone() || self.prefs.is_installed()? || self.is_suppressed()? {
            return Ok(None);
        }

        if env.platform().supports_native_prompt() {
            return Ok(capability_available.then_some(BannerKind::NativePrompt));
        }
        Ok((!self.prefs.ios_instructions_dismissed()?).then_some(BannerKind::IosInstructions))
    }

    pub fn dismiss_ios_instructions(&self) -> Result<(), ClientError> {
        self.prefs.dismiss_ios_instructions()
    }
}
