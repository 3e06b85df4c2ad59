use std::collections::HashMap;
use std::fmt;

/// Stable identity of a display adapter/monitor pair as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(String);

impl AdapterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayScale {
    pub adapter: AdapterId,
    pub scale_percent: u32,
}

impl DisplayScale {
    pub fn new(adapter: &str, scale_percent: u32) -> Self {
        Self {
            adapter: AdapterId::new(adapter),
            scale_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleChange {
    pub adapter: AdapterId,
    pub previous: u32,
    pub current: u32,
}

impl ScaleChange {
    pub fn is_increase(&self) -> bool {
        self.current > self.previous
    }
}

/// Last known scale per adapter.
///
/// Displays that disappear are kept: a monitor that is reconnected under the
/// same identity is diffed against its old scale.
#[derive(Debug, Default)]
pub struct DisplayStates {
    by_adapter: HashMap<AdapterId, u32>,
}

impl DisplayStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every display as baseline without producing changes.
    pub fn seed(&mut self, displays: &[DisplayScale]) {
        for entry in displays {
            self.by_adapter
                .insert(entry.adapter.clone(), entry.scale_percent);
        }
    }

    /// Compare against the baseline and update it. Unknown adapters are added
    /// silently since there is nothing to diff against.
    pub fn observe(&mut self, displays: &[DisplayScale]) -> Vec<ScaleChange> {
        let mut changes = Vec::new();
        for entry in displays {
            match self.by_adapter.get_mut(&entry.adapter) {
                Some(previous) if *previous != entry.scale_percent => {
                    changes.push(ScaleChange {
                        adapter: entry.adapter.clone(),
                        previous: *previous,
                        current: entry.scale_percent,
                    });
                    *previous = entry.scale_percent;
                }
                Some(_) => {}
                None => {
                    tracing::debug!(
                        "New display {} at {}%",
                        entry.adapter,
                        entry.scale_percent
                    );
                    self.by_adapter
                        .insert(entry.adapter.clone(), entry.scale_percent);
                }
            }
        }
        changes
    }

    pub fn get(&self, adapter: &AdapterId) -> Option<u32> {
        self.by_adapter.get(adapter).copied()
    }

    pub fn len(&self) -> usize {
        self.by_adapter.len()
    }

    /// Sorted by adapter for stable output
    pub fn entries(&self) -> Vec<(AdapterId, u32)> {
        let mut entries: Vec<_> = self
            .by_adapter
            .iter()
            .map(|(id, scale)| (id.clone(), *scale))
            .collect();
        entries.sort();
        entries
    }
}
