use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Queries
    Ping,
    Status,

    // Control
    Quit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Pong { version: String },
    Error { message: String },
    Status { status: StatusInfo },
}

/// Last-known baseline of a single display's scale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub adapter: String,
    pub scale_percent: u32,
}

/// One entry of the dark theme history; `None` means the value could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThemeObservation {
    pub apps_dark: Option<bool>,
    pub system_dark: Option<bool>,
}

/// Snapshot of every baseline the daemon currently holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusInfo {
    pub high_contrast: Option<bool>,
    pub color_filters: Option<bool>,
    pub night_light: Option<bool>,
    pub cursor_size: Option<u32>,
    /// Whether further cursor size changes are currently being folded into the last report
    pub cursor_debounce_active: bool,
    pub displays: Vec<DisplayStatus>,
    /// Newest first, at most two entries
    pub dark_theme: Vec<ThemeObservation>,
    pub watched_keys: Vec<String>,
    pub running_processes: Vec<String>,
}
