//! Platform and display-mode detection.

use serde::{Deserialize, Serialize};

/// Platform family, as far as installation is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// iOS Safari: no programmatic install, manual instructions only.
    Ios,
    /// Android / Chromium: native deferred prompt.
    Android,
    Other,
}

impl Platform {
    /// Sniff the platform from a user agent string.
    pub fn detect(user_agent: &str) -> Self {
        let ios = ["iPhone", "iPad", "iPod"]
            .iter()
            .any(|device| user_agent.contains(device));
        // IE11 on Windows Phone claims to be an iPhone.
        if ios && !user_agent.contains("MSStream") {
            Platform::Ios
        } else if user_agent.contains("Android") {
            Platform::Android
        } else {
            Platform::Other
        }
    }

    /// Whether the host can hand us a deferred install prompt.
    pub fn supports_native_prompt(&self) -> bool {
        !matches!(self, Platform::Ios)
    }
}

/// Value of the `display-mode` media feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    #[default]
    Browser,
    MinimalUi,
    Standalone,
    Fullscreen,
}

/// What the page knows about the host it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub user_agent: String,
    pub display_mode: DisplayMode,
    /// iOS `navigator.standalone`.
    pub navigator_standalone: bool,
}

impl Environment {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            display_mode: DisplayMode::Browser,
            navigator_standalone: false,
        }
    }

    pub fn with_display_mode(mut self, mode: DisplayMode) -> Self {
        self.display_mode = mode;
        self
    }

    pub fn platform(&self) -> Platform {
        Platform::detect(&self.user_agent)
    }

    /// Running as an installed app rather than in browser chrome.
    pub fn is_standalone(&self) -> bool {
        self.display_mode == DisplayMode::Standalone || self.navigator_standalone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";
    const DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

    #[test]
    fn test_detect_platform() {
        assert_eq!(Platform::detect(IPHONE), Platform::Ios);
        assert_eq!(Platform::detect(PIXEL), Platform::Android);
        assert_eq!(Platform::detect(DESKTOP), Platform::Other);
        assert_eq!(
            Platform::detect("Mozilla/5.0 (iPhone; MSStream) Windows Phone"),
            Platform::Other
        );
    }

    #[test]
    fn test_native_prompt_support() {
        assert!(!Platform::Ios.supports_native_prompt());
        assert!(Platform::Android.supports_native_prompt());
    }

    #[test]
    fn test_standalone_detection() {
        assert!(!Environment::new(PIXEL).is_standalone());
        assert!(Environment::new(PIXEL)
            .with_display_mode(DisplayMode::Standalone)
            .is_standalone());

        let mut ios = Environment::new(IPHONE);
        ios.navigator_standalone = true;
        assert!(ios.is_standalone());
    }
}
