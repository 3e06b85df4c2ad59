use std::collections::VecDeque;

use a11ypulse_ipc::ThemeObservation;

const HISTORY_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DarkMode {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeChange {
    Unchanged,
    /// First observation, recorded without a report
    Baseline,
    /// Trailing half of a two-step OS transition that was already reported
    Suppressed,
    /// `None` when the values changed without a dark/light flip (e.g. a value became readable)
    Reported(Option<DarkMode>),
}

fn is_uniform(obs: &ThemeObservation) -> bool {
    obs.system_dark.is_some() && obs.apps_dark == obs.system_dark
}

fn direction(from: &ThemeObservation, to: &ThemeObservation) -> Option<DarkMode> {
    let flips = [(from.apps_dark, to.apps_dark), (from.system_dark, to.system_dark)];
    if flips
        .iter()
        .any(|pair| matches!(pair, (Some(false), Some(true))))
    {
        return Some(DarkMode::On);
    }
    if flips
        .iter()
        .any(|pair| matches!(pair, (Some(true), Some(false))))
    {
        return Some(DarkMode::Off);
    }
    None
}

/// The two most recent theme observations, newest first.
///
/// Toggling dark mode in Settings flips the apps and system values in two
/// separate writes. The second write is recognised by looking past the
/// intermediate entry at the one before it.
#[derive(Debug, Default)]
pub struct DarkThemeHistory {
    entries: VecDeque<ThemeObservation>,
}

impl DarkThemeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, obs: ThemeObservation) {
        self.entries.clear();
        self.entries.push_front(obs);
    }

    pub fn entries(&self) -> Vec<ThemeObservation> {
        self.entries.iter().copied().collect()
    }

    pub fn observe(&mut self, obs: ThemeObservation) -> ThemeChange {
        let Some(newest) = self.entries.front().copied() else {
            self.push(obs);
            return ThemeChange::Baseline;
        };
        if newest == obs {
            return ThemeChange::Unchanged;
        }

        let verdict = match self.entries.get(1).copied() {
            None => ThemeChange::Reported(direction(&newest, &obs)),
            // System value not available on this OS: nothing to pair with.
            Some(_) if obs.system_dark.is_none() => {
                ThemeChange::Reported(direction(&newest, &obs))
            }
            Some(older) => {
                if is_uniform(&older) && is_uniform(&obs) && older.apps_dark != obs.apps_dark {
                    ThemeChange::Suppressed
                } else {
                    ThemeChange::Reported(direction(&older, &obs).or(direction(&newest, &obs)))
                }
            }
        };

        self.push(obs);
        verdict
    }

    fn push(&mut self, obs: ThemeObservation) {
        self.entries.push_front(obs);
        self.entries.truncate(HISTORY_DEPTH);
    }
}
