mod config;
mod cursor;
mod detector;
mod display;
mod state;
mod theme;

pub use config::*;
pub use cursor::*;
pub use detector::*;
pub use display::*;
pub use state::*;
pub use theme::*;

use std::fmt;

use crate::multiplexer::WatchKey;

const NIGHT_LIGHT_KEY: &str = concat!(
    r"Software\Microsoft\Windows\CurrentVersion\CloudStore\Store\DefaultAccount\Current\",
    r"default$windows.data.bluelightreduction.bluelightreductionstate\",
    r"windows.data.bluelightreduction.bluelightreductionstate"
);

/// An accessibility setting whose changes are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    HighContrast,
    DisplayScale,
    CursorSize,
    DarkTheme,
    ColorFilters,
    NightLight,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::HighContrast,
        Feature::DisplayScale,
        Feature::CursorSize,
        Feature::DarkTheme,
        Feature::ColorFilters,
        Feature::NightLight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::HighContrast => "high-contrast",
            Feature::DisplayScale => "display-scale",
            Feature::CursorSize => "cursor-size",
            Feature::DarkTheme => "dark-theme",
            Feature::ColorFilters => "color-filters",
            Feature::NightLight => "night-light",
        }
    }

    /// Registry keys (under the current user hive) whose changes trigger a re-check
    pub fn watch_keys(&self) -> Vec<WatchKey> {
        let paths: &[&str] = match self {
            Feature::HighContrast => &[r"Control Panel\Accessibility\HighContrast"],
            Feature::DisplayScale => &[
                r"Control Panel\Desktop",
                r"Control Panel\Desktop\PerMonitorSettings",
            ],
            Feature::CursorSize => &[r"Control Panel\Cursors", r"Software\Microsoft\Accessibility"],
            Feature::DarkTheme => &[r"Software\Microsoft\Windows\CurrentVersion\Themes\Personalize"],
            Feature::ColorFilters => &[r"Software\Microsoft\ColorFiltering"],
            Feature::NightLight => &[NIGHT_LIGHT_KEY],
        };
        paths.iter().map(|path| WatchKey::new(*path)).collect()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_feature_has_watch_keys() {
        for feature in Feature::ALL {
            assert!(!feature.watch_keys().is_empty(), "{}", feature);
        }
    }

    #[test]
    fn test_display_scale_watches_both_desktop_keys() {
        let keys: HashSet<_> = Feature::DisplayScale
            .watch_keys()
            .into_iter()
            .map(|k| k.as_str().to_string())
            .collect();
        assert!(keys.contains(r"Control Panel\Desktop"));
        assert!(keys.contains(r"Control Panel\Desktop\PerMonitorSettings"));
    }

    #[test]
    fn test_night_light_key_is_under_cloud_store() {
        let keys = Feature::NightLight.watch_keys();
        assert!(keys[0].as_str().ends_with("bluelightreductionstate"));
        assert!(keys[0].as_str().contains(r"\CloudStore\Store\"));
    }
}
