use std::sync::Arc;
use std::time::Instant;

use a11ypulse_ipc::names;
use anyhow::Result;
use serde_json::json;

use super::{
    Config, CursorChange, DarkMode, Feature, StateStore, ThemeChange, Toggle, ToggleChange,
};
use crate::platform::SettingsReader;
use crate::process::ProcessTransition;
use crate::telemetry::TelemetrySink;

/// Turns fresh OS reads into telemetry by diffing them against the state store.
///
/// Must only be driven from the scheduler worker, so checks never race each other.
/// A failed read is logged and leaves the baseline untouched.
pub struct ChangeDetector {
    store: Arc<StateStore>,
    settings: Arc<dyn SettingsReader>,
    sink: Arc<dyn TelemetrySink>,
    config: Config,
}

impl ChangeDetector {
    pub fn new(
        store: Arc<StateStore>,
        settings: Arc<dyn SettingsReader>,
        sink: Arc<dyn TelemetrySink>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            settings,
            sink,
            config: config.clone(),
        }
    }

    /// Record the current value of every feature without reporting anything.
    pub fn seed(&self) {
        if let Some(value) = read(Feature::HighContrast, self.settings.high_contrast()) {
            self.store.seed_toggle(Toggle::HighContrast, value);
        }
        if let Some(value) = read(Feature::ColorFilters, self.settings.color_filters_active()) {
            self.store.seed_toggle(Toggle::ColorFilters, value);
        }
        if let Some(value) = read(
            Feature::NightLight,
            self.settings.night_light(self.config.night_light_timeout()),
        ) {
            self.store.seed_toggle(Toggle::NightLight, value);
        }
        if let Some(size) = read(Feature::CursorSize, self.settings.cursor_size()) {
            self.store.seed_cursor(size);
        }
        if let Some(displays) = read(Feature::DisplayScale, self.settings.displays()) {
            self.store.seed_displays(&displays);
        }
        if let Some(obs) = read(Feature::DarkTheme, self.settings.dark_theme()) {
            self.store.seed_dark_theme(obs);
        }
        tracing::info!("Seeded baselines: {:?}", self.store.status(Instant::now()));
    }

    pub fn check(&self, feature: Feature) {
        match feature {
            Feature::HighContrast => self.check_toggle(
                Toggle::HighContrast,
                self.settings.high_contrast(),
                names::HIGH_CONTRAST_ON,
                names::HIGH_CONTRAST_OFF,
            ),
            Feature::ColorFilters => self.check_toggle(
                Toggle::ColorFilters,
                self.settings.color_filters_active(),
                names::COLOR_FILTERS_ON,
                names::COLOR_FILTERS_OFF,
            ),
            Feature::NightLight => self.check_toggle(
                Toggle::NightLight,
                self.settings.night_light(self.config.night_light_timeout()),
                names::NIGHT_LIGHT_ON,
                names::NIGHT_LIGHT_OFF,
            ),
            Feature::DisplayScale => self.check_display_scale(),
            Feature::CursorSize => self.check_cursor_size_at(Instant::now()),
            Feature::DarkTheme => self.check_dark_theme(),
        }
    }

    fn check_toggle(&self, toggle: Toggle, value: Result<bool>, on: &str, off: &str) {
        let Some(value) = read(feature_of(toggle), value) else {
            return;
        };
        match self.store.observe_toggle(toggle, value) {
            ToggleChange::Changed(true) => self.sink.enqueue_event(on, None),
            ToggleChange::Changed(false) => self.sink.enqueue_event(off, None),
            ToggleChange::Baseline => {
                tracing::debug!("{:?} baseline recorded as {}", toggle, value);
            }
            ToggleChange::Unchanged => {}
        }
    }

    fn check_display_scale(&self) {
        let Some(displays) = read(Feature::DisplayScale, self.settings.displays()) else {
            return;
        };
        for change in self.store.observe_displays(&displays) {
            let name = if change.is_increase() {
                names::TEXT_SIZE_INCREASE
            } else {
                names::TEXT_SIZE_DECREASE
            };
            self.sink.enqueue_event(
                name,
                Some(json!({
                    "adapter": change.adapter.as_str(),
                    "previous": change.previous,
                    "current": change.current,
                })),
            );
        }
    }

    pub fn check_cursor_size_at(&self, now: Instant) {
        let Some(size) = read(Feature::CursorSize, self.settings.cursor_size()) else {
            return;
        };
        match self.store.observe_cursor(size, now, self.config.cursor_debounce()) {
            CursorChange::Reported { previous, current } => self.sink.enqueue_event(
                names::CURSOR_SIZE_CHANGED,
                Some(json!({ "previous": previous, "current": current })),
            ),
            CursorChange::Suppressed => {
                tracing::debug!("Cursor size {} folded into current burst", size);
            }
            CursorChange::Baseline | CursorChange::Unchanged => {}
        }
    }

    fn check_dark_theme(&self) {
        let Some(obs) = read(Feature::DarkTheme, self.settings.dark_theme()) else {
            return;
        };
        match self.store.observe_dark_theme(obs) {
            ThemeChange::Reported(Some(mode)) => {
                let name = match mode {
                    DarkMode::On => names::DARK_MODE_ON,
                    DarkMode::Off => names::DARK_MODE_OFF,
                };
                self.sink.enqueue_event(
                    name,
                    Some(json!({
                        "apps_dark": obs.apps_dark,
                        "system_dark": obs.system_dark,
                    })),
                );
            }
            ThemeChange::Reported(None) => {
                tracing::debug!("Theme values changed without a dark/light flip: {:?}", obs);
            }
            ThemeChange::Suppressed => {
                tracing::debug!("Second half of theme transition suppressed: {:?}", obs);
            }
            ThemeChange::Baseline | ThemeChange::Unchanged => {}
        }
    }

    /// Map a process start/stop to its configured event, if the process is watched.
    pub fn on_process(&self, process_name: &str, transition: ProcessTransition) {
        let Some(watched) = self.config.watched_process(process_name) else {
            return;
        };
        let name = match transition {
            ProcessTransition::Started => Some(&watched.start_event),
            ProcessTransition::Stopped => watched.stop_event.as_ref(),
        };
        if let Some(name) = name {
            self.sink
                .enqueue_event(name, Some(json!({ "process": watched.name })));
        }
    }
}

fn feature_of(toggle: Toggle) -> Feature {
    match toggle {
        Toggle::HighContrast => Feature::HighContrast,
        Toggle::ColorFilters => Feature::ColorFilters,
        Toggle::NightLight => Feature::NightLight,
    }
}

fn read<T>(feature: Feature, value: Result<T>) -> Option<T> {
    match value {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Failed to read {}: {:#}", feature, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::DisplayScale;
    use crate::platform::mock::MockSettings;
    use crate::telemetry::mock::RecordingSink;

    struct Fixture {
        settings: Arc<MockSettings>,
        sink: Arc<RecordingSink>,
        store: Arc<StateStore>,
        detector: ChangeDetector,
    }

    fn setup(settings: MockSettings) -> Fixture {
        let settings = Arc::new(settings);
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(StateStore::new());
        let detector = ChangeDetector::new(
            Arc::clone(&store),
            settings.clone(),
            sink.clone(),
            &Config::default(),
        );
        detector.seed();
        Fixture {
            settings,
            sink,
            store,
            detector,
        }
    }

    #[test]
    fn test_seed_emits_nothing() {
        let f = setup(MockSettings::new().with_cursor_size(Some(48)));
        assert!(f.sink.names().is_empty());
        assert_eq!(f.store.cursor_size(), Some(48));
        assert_eq!(f.store.toggle(Toggle::HighContrast), Some(false));
    }

    #[test]
    fn test_high_contrast_on_off() {
        let f = setup(MockSettings::new());
        f.settings.set_high_contrast(Some(true));
        f.detector.check(Feature::HighContrast);
        f.detector.check(Feature::HighContrast);
        f.settings.set_high_contrast(Some(false));
        f.detector.check(Feature::HighContrast);
        assert_eq!(
            f.sink.names(),
            vec![names::HIGH_CONTRAST_ON, names::HIGH_CONTRAST_OFF]
        );
    }

    #[test]
    fn test_toggle_without_baseline_is_recorded_silently() {
        let settings = MockSettings::new();
        settings.update(|v| v.night_light = None);
        let f = setup(settings);
        assert_eq!(f.store.toggle(Toggle::NightLight), None);

        f.settings.update(|v| v.night_light = Some(true));
        f.detector.check(Feature::NightLight);
        assert!(f.sink.names().is_empty());

        f.settings.update(|v| v.night_light = Some(false));
        f.detector.check(Feature::NightLight);
        assert_eq!(f.sink.names(), vec![names::NIGHT_LIGHT_OFF]);
    }

    #[test]
    fn test_failed_read_keeps_baseline() {
        let f = setup(MockSettings::new());
        f.settings.update(|v| v.color_filters = None);
        f.detector.check(Feature::ColorFilters);
        assert_eq!(f.store.toggle(Toggle::ColorFilters), Some(false));

        f.settings.set_cursor_size(None);
        f.detector.check(Feature::CursorSize);
        assert_eq!(f.store.cursor_size(), Some(32));
        assert!(f.sink.names().is_empty());

        f.settings.update(|v| v.color_filters = Some(true));
        f.detector.check(Feature::ColorFilters);
        assert_eq!(f.sink.names(), vec![names::COLOR_FILTERS_ON]);
    }

    #[test]
    fn test_cursor_burst_reports_once() {
        let f = setup(MockSettings::new().with_cursor_size(Some(32)));
        let start = Instant::now();
        for (i, size) in [36, 40, 44].iter().enumerate() {
            f.settings.set_cursor_size(Some(*size));
            f.detector
                .check_cursor_size_at(start + Duration::from_millis(i as u64 * 300));
        }
        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, names::CURSOR_SIZE_CHANGED);
        assert_eq!(events[0].1, Some(json!({"previous": 32, "current": 36})));
        assert_eq!(f.store.cursor_size(), Some(44));
    }

    #[test]
    fn test_cursor_changes_in_separate_windows() {
        let f = setup(MockSettings::new().with_cursor_size(Some(32)));
        let start = Instant::now();
        f.settings.set_cursor_size(Some(36));
        f.detector.check_cursor_size_at(start);

        let later = start + Duration::from_secs(11);
        f.detector.check_cursor_size_at(later);
        f.settings.set_cursor_size(Some(40));
        f.detector.check_cursor_size_at(later);

        assert_eq!(
            f.sink.names(),
            vec![names::CURSOR_SIZE_CHANGED, names::CURSOR_SIZE_CHANGED]
        );
    }

    #[test]
    fn test_dark_mode_two_step_transition_reports_once() {
        let f = setup(MockSettings::new().with_dark_theme(false, false));
        f.settings.set_dark_theme(true, false);
        f.detector.check(Feature::DarkTheme);
        f.settings.set_dark_theme(true, true);
        f.detector.check(Feature::DarkTheme);
        f.detector.check(Feature::DarkTheme);

        assert_eq!(f.sink.names(), vec![names::DARK_MODE_ON]);
        assert_eq!(f.store.dark_theme_history().len(), 2);
    }

    #[test]
    fn test_display_insert_then_diff() {
        let f = setup(
            MockSettings::new().with_displays(vec![DisplayScale::new("DISPLAY1", 100)]),
        );

        f.settings.set_displays(vec![
            DisplayScale::new("DISPLAY1", 100),
            DisplayScale::new("DISPLAY2", 125),
        ]);
        f.detector.check(Feature::DisplayScale);
        assert!(f.sink.names().is_empty());

        f.settings.set_displays(vec![DisplayScale::new("DISPLAY2", 150)]);
        f.detector.check(Feature::DisplayScale);
        f.settings.set_displays(vec![DisplayScale::new("DISPLAY2", 100)]);
        f.detector.check(Feature::DisplayScale);
        f.detector.check(Feature::DisplayScale);

        let events = f.sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, names::TEXT_SIZE_INCREASE);
        assert_eq!(
            events[0].1,
            Some(json!({"adapter": "DISPLAY2", "previous": 125, "current": 150}))
        );
        assert_eq!(events[1].0, names::TEXT_SIZE_DECREASE);
    }

    #[test]
    fn test_watched_process_events() {
        let f = setup(MockSettings::new());
        f.detector.on_process("Magnify.exe", ProcessTransition::Started);
        f.detector.on_process("magnify.exe", ProcessTransition::Stopped);
        f.detector.on_process("osk.exe", ProcessTransition::Started);
        f.detector.on_process("osk.exe", ProcessTransition::Stopped);
        f.detector.on_process("notepad.exe", ProcessTransition::Started);

        assert_eq!(
            f.sink.names(),
            vec!["magnifierStarted", "magnifierStopped", "onScreenKeyboardStarted"]
        );
    }
}
