use std::mem;

use anyhow::{bail, Result};
use windows::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOEXW,
};
use windows::Win32::UI::HiDpi::{
    GetDpiForMonitor, SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    MDT_EFFECTIVE_DPI,
};

use crate::core::DisplayScale;

const BASE_DPI: u32 = 96;

/// Without per-monitor awareness every monitor reports the system DPI.
pub fn enable_per_monitor_dpi() {
    if let Err(e) =
        unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) }
    {
        tracing::debug!("Per-monitor DPI awareness not set: {}", e);
    }
}

pub fn scale_percent(dpi: u32) -> u32 {
    dpi * 100 / BASE_DPI
}

unsafe extern "system" fn collect_monitor(
    monitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    data: LPARAM,
) -> BOOL {
    let monitors = &mut *(data.0 as *mut Vec<HMONITOR>);
    monitors.push(monitor);
    TRUE
}

fn device_name(monitor: HMONITOR) -> Option<String> {
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;
    let ok = unsafe {
        GetMonitorInfoW(
            monitor,
            &mut info as *mut MONITORINFOEXW as *mut MONITORINFO,
        )
    };
    if !ok.as_bool() {
        return None;
    }
    let len = info
        .szDevice
        .iter()
        .position(|c| *c == 0)
        .unwrap_or(info.szDevice.len());
    Some(String::from_utf16_lossy(&info.szDevice[..len]))
}

pub fn enumerate() -> Result<Vec<DisplayScale>> {
    let mut monitors: Vec<HMONITOR> = Vec::new();
    let ok = unsafe {
        EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(collect_monitor),
            LPARAM(&mut monitors as *mut Vec<HMONITOR> as isize),
        )
    };
    if !ok.as_bool() {
        bail!("EnumDisplayMonitors failed");
    }

    let mut displays = Vec::with_capacity(monitors.len());
    for monitor in monitors {
        let Some(name) = device_name(monitor) else {
            tracing::debug!("Skipping monitor without device name");
            continue;
        };
        let (mut dpi_x, mut dpi_y) = (0u32, 0u32);
        let dpi = unsafe { GetDpiForMonitor(monitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) };
        if let Err(e) = dpi {
            tracing::debug!("GetDpiForMonitor failed for {}: {}", name, e);
            continue;
        }
        displays.push(DisplayScale::new(&name, scale_percent(dpi_x)));
    }
    Ok(displays)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_percent() {
        assert_eq!(scale_percent(96), 100);
        assert_eq!(scale_percent(120), 125);
        assert_eq!(scale_percent(144), 150);
        assert_eq!(scale_percent(192), 200);
    }
}
