//! Common types used throughout FieldKit

use serde::{Deserialize, Serialize};

/// Which worker behaviour a registration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Precache, routed fetch strategies, push and sync.
    #[default]
    FullCaching,
    /// Installability only; never intercepts a fetch.
    InstallOnly,
}

/// The two installable surfaces of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    /// The main field-service application.
    Main,
    /// The customer portal.
    Portal,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Main => "main",
            Surface::Portal => "portal",
        }
    }
}

/// How long a dismissed install banner stays hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BannerSuppression {
    /// Hidden for a number of days after the dismissal timestamp.
    Days { days: u32 },
    /// Hidden until the page is loaded again.
    Session,
}

impl Default for BannerSuppression {
    fn default() -> Self {
        Self::Days { days: 7 }
    }
}
