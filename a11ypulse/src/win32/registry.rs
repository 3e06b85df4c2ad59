use std::ffi::c_void;
use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use a11ypulse_ipc::ThemeObservation;
use anyhow::{anyhow, bail, Context, Result};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{
    CloseHandle, BOOLEAN, ERROR_FILE_NOT_FOUND, FALSE, HANDLE, INVALID_HANDLE_VALUE, TRUE,
};
use windows::Win32::System::Registry::{
    RegCloseKey, RegGetValueW, RegNotifyChangeKeyValue, RegOpenKeyExW, HKEY, HKEY_CURRENT_USER,
    KEY_NOTIFY, KEY_READ, REG_NOTIFY_CHANGE_LAST_SET, REG_NOTIFY_CHANGE_NAME,
    REG_NOTIFY_THREAD_AGNOSTIC, RRF_RT_REG_BINARY, RRF_RT_REG_DWORD,
};
use windows::Win32::System::Threading::{
    CreateEventW, RegisterWaitForSingleObject, UnregisterWaitEx, INFINITE, WT_EXECUTEONLYONCE,
};
use windows::Win32::UI::Accessibility::{HCF_HIGHCONTRASTON, HIGHCONTRASTW};
use windows::Win32::UI::WindowsAndMessaging::{
    SystemParametersInfoW, SPI_GETHIGHCONTRAST, SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS,
};

use super::display;
use crate::core::{DisplayScale, Feature};
use crate::multiplexer::{ChangeNotifier, NotifierFactory, WaitHandle, WatchKey};
use crate::platform::SettingsReader;

const PERSONALIZE_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Themes\Personalize";
const CURSORS_KEY: &str = r"Control Panel\Cursors";
const COLOR_FILTERING_KEY: &str = r"Software\Microsoft\ColorFiltering";
const DEFAULT_CURSOR_SIZE: u32 = 32;
/// Offset of the state marker inside the night light blob; 0x15 means active
const NIGHT_LIGHT_STATE_OFFSET: usize = 18;
const NIGHT_LIGHT_ACTIVE: u8 = 0x15;

/// `Ok(None)` when the value does not exist
fn read_dword(subkey: &str, value: &str) -> Result<Option<u32>> {
    let mut data = 0u32;
    let mut size = std::mem::size_of::<u32>() as u32;
    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            &HSTRING::from(subkey),
            &HSTRING::from(value),
            RRF_RT_REG_DWORD,
            None,
            Some(&mut data as *mut u32 as *mut c_void),
            Some(&mut size),
        )
    };
    if status == ERROR_FILE_NOT_FOUND {
        return Ok(None);
    }
    status
        .ok()
        .with_context(|| format!(r"Failed to read HKCU\{}\{}", subkey, value))?;
    Ok(Some(data))
}

fn read_binary(subkey: &str, value: &str) -> Result<Vec<u8>> {
    let subkey_w = HSTRING::from(subkey);
    let value_w = HSTRING::from(value);
    let mut size = 0u32;
    unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            &subkey_w,
            &value_w,
            RRF_RT_REG_BINARY,
            None,
            None,
            Some(&mut size),
        )
        .ok()
        .with_context(|| format!(r"Failed to size HKCU\{}\{}", subkey, value))?;
    }
    let mut data = vec![0u8; size as usize];
    unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            &subkey_w,
            &value_w,
            RRF_RT_REG_BINARY,
            None,
            Some(data.as_mut_ptr() as *mut c_void),
            Some(&mut size),
        )
        .ok()
        .with_context(|| format!(r"Failed to read HKCU\{}\{}", subkey, value))?;
    }
    data.truncate(size as usize);
    Ok(data)
}

fn read_night_light() -> Result<bool> {
    let keys = Feature::NightLight.watch_keys();
    let key = keys
        .first()
        .ok_or_else(|| anyhow!("night light key is not configured"))?;
    let blob = read_binary(key.as_str(), "Data")?;
    match blob.get(NIGHT_LIGHT_STATE_OFFSET) {
        Some(marker) => Ok(*marker == NIGHT_LIGHT_ACTIVE),
        None => bail!("night light blob too short ({} bytes)", blob.len()),
    }
}

/// Reads accessibility settings from the current user's registry hive
pub struct RegistrySettings;

impl RegistrySettings {
    pub fn new() -> Self {
        display::enable_per_monitor_dpi();
        Self
    }
}

impl SettingsReader for RegistrySettings {
    fn high_contrast(&self) -> Result<bool> {
        let mut info = HIGHCONTRASTW {
            cbSize: std::mem::size_of::<HIGHCONTRASTW>() as u32,
            ..Default::default()
        };
        unsafe {
            SystemParametersInfoW(
                SPI_GETHIGHCONTRAST,
                info.cbSize,
                Some(&mut info as *mut HIGHCONTRASTW as *mut c_void),
                SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS(0),
            )
            .context("SPI_GETHIGHCONTRAST failed")?;
        }
        Ok(info.dwFlags.0 & HCF_HIGHCONTRASTON.0 != 0)
    }

    fn dark_theme(&self) -> Result<ThemeObservation> {
        // Light theme flags: 0 means dark
        let apps = read_dword(PERSONALIZE_KEY, "AppsUseLightTheme")?;
        let system = read_dword(PERSONALIZE_KEY, "SystemUsesLightTheme")?;
        Ok(ThemeObservation {
            apps_dark: Some(apps.is_some_and(|v| v == 0)),
            system_dark: system.map(|v| v == 0),
        })
    }

    fn cursor_size(&self) -> Result<u32> {
        Ok(read_dword(CURSORS_KEY, "CursorBaseSize")?.unwrap_or(DEFAULT_CURSOR_SIZE))
    }

    fn color_filters_active(&self) -> Result<bool> {
        Ok(read_dword(COLOR_FILTERING_KEY, "Active")?.is_some_and(|v| v != 0))
    }

    fn night_light(&self, timeout: Duration) -> Result<bool> {
        let (tx, rx) = std_mpsc::channel();
        thread::Builder::new()
            .name("night-light-read".to_string())
            .spawn(move || {
                let _ = tx.send(read_night_light());
            })
            .context("Failed to spawn night light reader")?;
        rx.recv_timeout(timeout)
            .map_err(|_| anyhow!("night light read timed out after {:?}", timeout))?
    }

    fn displays(&self) -> Result<Vec<DisplayScale>> {
        display::enumerate()
    }
}

type Slot = Mutex<Option<WaitHandle>>;

unsafe extern "system" fn on_key_changed(context: *mut c_void, _timed_out: BOOLEAN) {
    let slot = &*(context as *const Slot);
    let handle = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(handle) = handle {
        handle.signal();
    }
}

/// One open registry key with a one-shot change notification.
///
/// Each `arm` requests a single `RegNotifyChangeKeyValue` signal and a single
/// thread-pool wait on it; the wait callback hands the signal to the multiplexer.
pub struct RegistryNotifier {
    key: HKEY,
    event: HANDLE,
    slot: Box<Slot>,
    wait: Mutex<Option<HANDLE>>,
}

// The raw handles are only used through thread-safe Win32 calls
unsafe impl Send for RegistryNotifier {}
unsafe impl Sync for RegistryNotifier {}

impl RegistryNotifier {
    fn open(key_path: &WatchKey) -> Result<Self> {
        let mut key = HKEY::default();
        unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                &HSTRING::from(key_path.as_str()),
                0,
                KEY_NOTIFY | KEY_READ,
                &mut key,
            )
            .ok()
            .with_context(|| format!(r"Failed to open HKCU\{}", key_path))?;
        }
        let event = match unsafe { CreateEventW(None, FALSE, FALSE, PCWSTR::null()) } {
            Ok(event) => event,
            Err(e) => {
                unsafe {
                    let _ = RegCloseKey(key);
                }
                return Err(e).context("Failed to create change event");
            }
        };
        Ok(Self {
            key,
            event,
            slot: Box::new(Mutex::new(None)),
            wait: Mutex::new(None),
        })
    }

    /// Blocks until a running callback has returned
    fn unregister_wait(&self) {
        let wait = self
            .wait
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(wait) = wait {
            if let Err(e) = unsafe { UnregisterWaitEx(wait, INVALID_HANDLE_VALUE) } {
                tracing::debug!("UnregisterWaitEx failed: {}", e);
            }
        }
    }
}

impl ChangeNotifier for RegistryNotifier {
    fn arm(&self, handle: WaitHandle) -> Result<()> {
        self.unregister_wait();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        unsafe {
            RegNotifyChangeKeyValue(
                self.key,
                TRUE,
                REG_NOTIFY_CHANGE_NAME | REG_NOTIFY_CHANGE_LAST_SET | REG_NOTIFY_THREAD_AGNOSTIC,
                self.event,
                TRUE,
            )
            .ok()
            .context("RegNotifyChangeKeyValue failed")?;

            let mut wait = HANDLE::default();
            RegisterWaitForSingleObject(
                &mut wait,
                self.event,
                Some(on_key_changed),
                Some(&*self.slot as *const Slot as *const c_void),
                INFINITE,
                WT_EXECUTEONLYONCE,
            )
            .context("RegisterWaitForSingleObject failed")?;
            *self.wait.lock().unwrap_or_else(PoisonError::into_inner) = Some(wait);
        }
        Ok(())
    }
}

impl Drop for RegistryNotifier {
    fn drop(&mut self) {
        self.unregister_wait();
        unsafe {
            let _ = RegCloseKey(self.key);
            let _ = CloseHandle(self.event);
        }
    }
}

pub struct RegistryNotifierFactory;

impl RegistryNotifierFactory {
    pub fn new() -> Self {
        Self
    }
}

impl NotifierFactory for RegistryNotifierFactory {
    fn open(&self, key: &WatchKey) -> Result<Box<dyn ChangeNotifier>> {
        Ok(Box::new(RegistryNotifier::open(key)?))
    }
}
