use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use a11ypulse_ipc::{DisplayStatus, StatusInfo, ThemeObservation};

use super::{
    CursorBaseline, CursorChange, DarkThemeHistory, DisplayScale, DisplayStates, ScaleChange,
    ThemeChange,
};

/// Features whose state is a plain on/off value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    HighContrast,
    ColorFilters,
    NightLight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleChange {
    Unchanged,
    /// No previous value was known; recorded without a report
    Baseline,
    Changed(bool),
}

#[derive(Debug, Default, Clone, Copy)]
struct ToggleBaselines {
    high_contrast: Option<bool>,
    color_filters: Option<bool>,
    night_light: Option<bool>,
}

impl ToggleBaselines {
    fn slot(&mut self, toggle: Toggle) -> &mut Option<bool> {
        match toggle {
            Toggle::HighContrast => &mut self.high_contrast,
            Toggle::ColorFilters => &mut self.color_filters,
            Toggle::NightLight => &mut self.night_light,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last known value of every observed feature.
///
/// Each feature sits behind its own lock. Detection runs on the scheduler
/// worker, but seeding and status queries come from other threads.
#[derive(Debug, Default)]
pub struct StateStore {
    toggles: Mutex<ToggleBaselines>,
    cursor: Mutex<CursorBaseline>,
    displays: Mutex<DisplayStates>,
    dark_theme: Mutex<DarkThemeHistory>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_toggle(&self, toggle: Toggle, value: bool) {
        *lock(&self.toggles).slot(toggle) = Some(value);
    }

    pub fn toggle(&self, toggle: Toggle) -> Option<bool> {
        *lock(&self.toggles).slot(toggle)
    }

    pub fn observe_toggle(&self, toggle: Toggle, value: bool) -> ToggleChange {
        let mut toggles = lock(&self.toggles);
        let slot = toggles.slot(toggle);
        let previous = slot.replace(value);
        match previous {
            None => ToggleChange::Baseline,
            Some(previous) if previous == value => ToggleChange::Unchanged,
            Some(_) => ToggleChange::Changed(value),
        }
    }

    pub fn seed_cursor(&self, size: u32) {
        lock(&self.cursor).seed(size);
    }

    pub fn cursor_size(&self) -> Option<u32> {
        lock(&self.cursor).size()
    }

    pub fn observe_cursor(&self, size: u32, now: Instant, interval: Duration) -> CursorChange {
        lock(&self.cursor).observe(size, now, interval)
    }

    pub fn seed_displays(&self, displays: &[DisplayScale]) {
        lock(&self.displays).seed(displays);
    }

    pub fn observe_displays(&self, displays: &[DisplayScale]) -> Vec<ScaleChange> {
        lock(&self.displays).observe(displays)
    }

    pub fn seed_dark_theme(&self, obs: ThemeObservation) {
        lock(&self.dark_theme).seed(obs);
    }

    pub fn observe_dark_theme(&self, obs: ThemeObservation) -> ThemeChange {
        lock(&self.dark_theme).observe(obs)
    }

    pub fn dark_theme_history(&self) -> Vec<ThemeObservation> {
        lock(&self.dark_theme).entries()
    }

    /// Snapshot of every baseline. Watched keys and processes are filled in by the engine.
    pub fn status(&self, now: Instant) -> StatusInfo {
        let toggles = *lock(&self.toggles);
        let (cursor_size, cursor_debounce_active) = {
            let cursor = lock(&self.cursor);
            (cursor.size(), cursor.is_debouncing(now))
        };
        let displays = lock(&self.displays)
            .entries()
            .into_iter()
            .map(|(adapter, scale_percent)| DisplayStatus {
                adapter: adapter.to_string(),
                scale_percent,
            })
            .collect();

        StatusInfo {
            high_contrast: toggles.high_contrast,
            color_filters: toggles.color_filters,
            night_light: toggles.night_light,
            cursor_size,
            cursor_debounce_active,
            displays,
            dark_theme: self.dark_theme_history(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_transitions() {
        let store = StateStore::new();
        assert_eq!(
            store.observe_toggle(Toggle::HighContrast, false),
            ToggleChange::Baseline
        );
        assert_eq!(
            store.observe_toggle(Toggle::HighContrast, false),
            ToggleChange::Unchanged
        );
        assert_eq!(
            store.observe_toggle(Toggle::HighContrast, true),
            ToggleChange::Changed(true)
        );
        assert_eq!(store.toggle(Toggle::HighContrast), Some(true));
        assert_eq!(store.toggle(Toggle::NightLight), None);
    }

    #[test]
    fn test_toggles_are_independent() {
        let store = StateStore::new();
        store.seed_toggle(Toggle::ColorFilters, true);
        store.seed_toggle(Toggle::NightLight, false);
        assert_eq!(
            store.observe_toggle(Toggle::NightLight, true),
            ToggleChange::Changed(true)
        );
        assert_eq!(store.toggle(Toggle::ColorFilters), Some(true));
    }

    #[test]
    fn test_status_reflects_baselines() {
        let store = StateStore::new();
        let now = Instant::now();
        store.seed_toggle(Toggle::HighContrast, true);
        store.seed_cursor(32);
        store.seed_displays(&[
            DisplayScale::new("DISPLAY2", 150),
            DisplayScale::new("DISPLAY1", 100),
        ]);
        store.seed_dark_theme(ThemeObservation {
            apps_dark: Some(true),
            system_dark: Some(false),
        });
        store.observe_cursor(48, now, Duration::from_secs(10));

        let status = store.status(now);
        assert_eq!(status.high_contrast, Some(true));
        assert_eq!(status.color_filters, None);
        assert_eq!(status.cursor_size, Some(48));
        assert!(status.cursor_debounce_active);
        assert_eq!(status.displays.len(), 2);
        assert_eq!(status.displays[0].adapter, "DISPLAY1");
        assert_eq!(status.dark_theme.len(), 1);
        assert!(status.watched_keys.is_empty());
    }
}
