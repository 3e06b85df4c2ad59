use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use a11ypulse_ipc::ThemeObservation;
use anyhow::{bail, Result};
use sysinfo::{ProcessesToUpdate, System};

use crate::core::DisplayScale;
use crate::multiplexer::{ChangeNotifier, NotifierFactory, WatchKey};

/// Synchronous reads of the current OS accessibility settings.
/// This abstraction allows mocking in tests.
pub trait SettingsReader: Send + Sync {
    fn high_contrast(&self) -> Result<bool>;
    fn dark_theme(&self) -> Result<ThemeObservation>;
    fn cursor_size(&self) -> Result<u32>;
    fn color_filters_active(&self) -> Result<bool>;
    /// The night light state lives behind an asynchronous store query, hence the timeout.
    fn night_light(&self, timeout: Duration) -> Result<bool>;
    fn displays(&self) -> Result<Vec<DisplayScale>>;
}

/// Enumerates running executables by name
pub trait ProcessLister: Send + Sync {
    fn running(&self) -> Result<Vec<String>>;
}

pub struct SysinfoProcessLister {
    system: Mutex<System>,
}

impl SysinfoProcessLister {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProcessLister {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLister for SysinfoProcessLister {
    fn running(&self) -> Result<Vec<String>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut names: Vec<String> = system
            .processes()
            .values()
            .map(|process| process.name().to_string_lossy().to_lowercase())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Backend used where the accessibility settings cannot be read.
/// Every read and every watch fails, so only the process source is wired.
pub struct UnsupportedSettings;

impl SettingsReader for UnsupportedSettings {
    fn high_contrast(&self) -> Result<bool> {
        bail!("high contrast is not readable on this platform")
    }

    fn dark_theme(&self) -> Result<ThemeObservation> {
        bail!("theme settings are not readable on this platform")
    }

    fn cursor_size(&self) -> Result<u32> {
        bail!("cursor size is not readable on this platform")
    }

    fn color_filters_active(&self) -> Result<bool> {
        bail!("color filters are not readable on this platform")
    }

    fn night_light(&self, _timeout: Duration) -> Result<bool> {
        bail!("night light is not readable on this platform")
    }

    fn displays(&self) -> Result<Vec<DisplayScale>> {
        bail!("display scale is not readable on this platform")
    }
}

pub struct UnsupportedNotifiers;

impl NotifierFactory for UnsupportedNotifiers {
    fn open(&self, key: &WatchKey) -> Result<Box<dyn ChangeNotifier>> {
        bail!("cannot watch {} on this platform", key)
    }
}

/// The OS collaborators the engine needs
#[derive(Clone)]
pub struct Platform {
    pub settings: Arc<dyn SettingsReader>,
    pub notifiers: Arc<dyn NotifierFactory>,
    pub processes: Arc<dyn ProcessLister>,
}

impl Platform {
    #[cfg(windows)]
    pub fn system() -> Self {
        Self {
            settings: Arc::new(crate::win32::RegistrySettings::new()),
            notifiers: Arc::new(crate::win32::RegistryNotifierFactory::new()),
            processes: Arc::new(SysinfoProcessLister::new()),
        }
    }

    #[cfg(not(windows))]
    pub fn system() -> Self {
        tracing::warn!("Accessibility settings are not available on this platform");
        Self {
            settings: Arc::new(UnsupportedSettings),
            notifiers: Arc::new(UnsupportedNotifiers),
            processes: Arc::new(SysinfoProcessLister::new()),
        }
    }
}
