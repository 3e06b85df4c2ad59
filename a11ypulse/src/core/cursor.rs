use std::time::{Duration, Instant};

/// Further changes before `suppress_until` are folded into the last report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceWindow {
    pub suppress_until: Instant,
}

impl DebounceWindow {
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.suppress_until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorChange {
    Unchanged,
    Baseline,
    Reported { previous: u32, current: u32 },
    Suppressed,
}

/// Cursor size baseline plus its debounce window.
///
/// Dragging the size slider writes a new value for every notch. Only the
/// first change of a burst is reported; every change inside the window
/// pushes its end out again.
#[derive(Debug, Default)]
pub struct CursorBaseline {
    size: Option<u32>,
    window: Option<DebounceWindow>,
}

impl CursorBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, size: u32) {
        self.size = Some(size);
    }

    pub fn size(&self) -> Option<u32> {
        self.size
    }

    pub fn is_debouncing(&self, now: Instant) -> bool {
        self.window.is_some_and(|w| w.is_active(now))
    }

    pub fn observe(&mut self, size: u32, now: Instant, interval: Duration) -> CursorChange {
        let Some(previous) = self.size else {
            self.size = Some(size);
            return CursorChange::Baseline;
        };
        if previous == size {
            return CursorChange::Unchanged;
        }

        // The baseline always follows the latest value.
        self.size = Some(size);

        let suppressed = self.is_debouncing(now);
        self.window = Some(DebounceWindow {
            suppress_until: now + interval,
        });
        if suppressed {
            return CursorChange::Suppressed;
        }
        CursorChange::Reported {
            previous,
            current: size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn test_burst_within_window_reports_once() {
        let start = Instant::now();
        let mut cursor = CursorBaseline::new();
        cursor.seed(32);

        let results: Vec<_> = [36, 40, 44]
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let at = start + Duration::from_millis(i as u64 * 200);
                cursor.observe(*size, at, WINDOW)
            })
            .collect();

        assert_eq!(
            results,
            vec![
                CursorChange::Reported {
                    previous: 32,
                    current: 36
                },
                CursorChange::Suppressed,
                CursorChange::Suppressed,
            ]
        );
        assert_eq!(cursor.size(), Some(44));
    }

    #[test]
    fn test_change_after_window_is_reported_again() {
        let start = Instant::now();
        let mut cursor = CursorBaseline::new();
        cursor.seed(32);

        assert!(matches!(
            cursor.observe(36, start, WINDOW),
            CursorChange::Reported { .. }
        ));
        assert_eq!(
            cursor.observe(40, start + WINDOW + Duration::from_millis(1), WINDOW),
            CursorChange::Reported {
                previous: 36,
                current: 40
            }
        );
    }

    #[test]
    fn test_suppressed_change_extends_window() {
        let start = Instant::now();
        let mut cursor = CursorBaseline::new();
        cursor.seed(32);

        cursor.observe(36, start, WINDOW);
        cursor.observe(40, start + Duration::from_secs(9), WINDOW);
        assert_eq!(
            cursor.observe(44, start + Duration::from_secs(11), WINDOW),
            CursorChange::Suppressed
        );
        assert_eq!(
            cursor.observe(48, start + Duration::from_secs(30), WINDOW),
            CursorChange::Reported {
                previous: 44,
                current: 48
            }
        );
    }

    #[test]
    fn test_same_value_is_unchanged() {
        let start = Instant::now();
        let mut cursor = CursorBaseline::new();
        cursor.seed(48);
        assert_eq!(cursor.observe(48, start, WINDOW), CursorChange::Unchanged);
        assert!(!cursor.is_debouncing(start));
    }

    #[test]
    fn test_missing_baseline_is_filled_silently() {
        let mut cursor = CursorBaseline::new();
        assert_eq!(
            cursor.observe(64, Instant::now(), WINDOW),
            CursorChange::Baseline
        );
        assert_eq!(cursor.size(), Some(64));
    }
}
