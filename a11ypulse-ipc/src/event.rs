use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::StatusInfo;

/// Names of the built-in telemetry events.
/// Watched-process events are named by configuration instead.
pub mod names {
    pub const SESSION_START: &str = "sessionStart";
    pub const SESSION_END: &str = "sessionEnd";
    pub const HIGH_CONTRAST_ON: &str = "highContrastOn";
    pub const HIGH_CONTRAST_OFF: &str = "highContrastOff";
    pub const TEXT_SIZE_INCREASE: &str = "textSizeIncrease";
    pub const TEXT_SIZE_DECREASE: &str = "textSizeDecrease";
    pub const CURSOR_SIZE_CHANGED: &str = "mouseCursorSizeChanged";
    pub const DARK_MODE_ON: &str = "darkModeOn";
    pub const DARK_MODE_OFF: &str = "darkModeOff";
    pub const COLOR_FILTERS_ON: &str = "colorFiltersOn";
    pub const COLOR_FILTERS_OFF: &str = "colorFiltersOff";
    pub const NIGHT_LIGHT_ON: &str = "nightLightOn";
    pub const NIGHT_LIGHT_OFF: &str = "nightLightOff";
}

/// Coarse grouping of telemetry events, used for subscription filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    Session,
    Contrast,
    Display,
    Cursor,
    Theme,
    ColorFilters,
    NightLight,
    Process,
}

impl FeatureFamily {
    /// Classify an event by name. Anything that is not a built-in event came
    /// from the watched-process allow-list.
    pub fn of(name: &str) -> Self {
        match name {
            names::SESSION_START | names::SESSION_END => Self::Session,
            names::HIGH_CONTRAST_ON | names::HIGH_CONTRAST_OFF => Self::Contrast,
            names::TEXT_SIZE_INCREASE | names::TEXT_SIZE_DECREASE => Self::Display,
            names::CURSOR_SIZE_CHANGED => Self::Cursor,
            names::DARK_MODE_ON | names::DARK_MODE_OFF => Self::Theme,
            names::COLOR_FILTERS_ON | names::COLOR_FILTERS_OFF => Self::ColorFilters,
            names::NIGHT_LIGHT_ON | names::NIGHT_LIGHT_OFF => Self::NightLight,
            _ => Self::Process,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(Self::Session),
            "contrast" => Some(Self::Contrast),
            "display" => Some(Self::Display),
            "cursor" => Some(Self::Cursor),
            "theme" => Some(Self::Theme),
            "color-filters" | "color_filters" => Some(Self::ColorFilters),
            "night-light" | "night_light" => Some(Self::NightLight),
            "process" => Some(Self::Process),
            _ => None,
        }
    }
}

/// A single "feature used" event as handed to the telemetry sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Milliseconds since the unix epoch at enqueue time
    pub timestamp_ms: u64,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            name: name.into(),
            payload,
            timestamp_ms,
        }
    }

    pub fn family(&self) -> FeatureFamily {
        FeatureFamily::of(&self.name)
    }
}

/// Event filter for subscribing to specific feature families
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub families: Vec<FeatureFamily>,
}

impl EventFilter {
    pub fn only(families: impl IntoIterator<Item = FeatureFamily>) -> Self {
        Self {
            families: families.into_iter().collect(),
        }
    }

    /// An empty filter matches every event
    pub fn matches(&self, event: &TelemetryEvent) -> bool {
        self.families.is_empty() || self.families.contains(&event.family())
    }
}

/// Request to subscribe to the telemetry stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Whether to send a status snapshot on connection
    #[serde(default)]
    pub snapshot: bool,
    #[serde(default)]
    pub filter: EventFilter,
}

/// Lines written by the event server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Event { event: TelemetryEvent },
    Snapshot { status: StatusInfo },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_classification() {
        assert_eq!(FeatureFamily::of("darkModeOn"), FeatureFamily::Theme);
        assert_eq!(FeatureFamily::of("textSizeDecrease"), FeatureFamily::Display);
        assert_eq!(FeatureFamily::of("sessionEnd"), FeatureFamily::Session);
        assert_eq!(FeatureFamily::of("magnifierStarted"), FeatureFamily::Process);
    }

    #[test]
    fn test_filter_empty_matches_all() {
        let filter = EventFilter::default();
        assert!(filter.matches(&TelemetryEvent::new(names::NIGHT_LIGHT_ON, None)));
        assert!(filter.matches(&TelemetryEvent::new("narratorStarted", None)));
    }

    #[test]
    fn test_filter_by_family() {
        let filter = EventFilter::only([FeatureFamily::Cursor, FeatureFamily::Theme]);
        assert!(filter.matches(&TelemetryEvent::new(names::CURSOR_SIZE_CHANGED, None)));
        assert!(filter.matches(&TelemetryEvent::new(names::DARK_MODE_OFF, None)));
        assert!(!filter.matches(&TelemetryEvent::new(names::HIGH_CONTRAST_ON, None)));
    }

    #[test]
    fn test_parse_family_aliases() {
        assert_eq!(
            FeatureFamily::parse("night-light"),
            Some(FeatureFamily::NightLight)
        );
        assert_eq!(
            FeatureFamily::parse("color_filters"),
            Some(FeatureFamily::ColorFilters)
        );
        assert_eq!(FeatureFamily::parse("window"), None);
    }

    #[test]
    fn test_event_payload_omitted_when_none() {
        let event = TelemetryEvent::new(names::HIGH_CONTRAST_ON, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"name\":\"highContrastOn\""));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_stream_message_serialization() {
        let msg = StreamMessage::Event {
            event: TelemetryEvent::new(
                names::TEXT_SIZE_INCREASE,
                Some(serde_json::json!({ "previous": 100, "current": 125 })),
            ),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"event\""));

        let deserialized: StreamMessage = serde_json::from_str(&json).unwrap();
        match deserialized {
            StreamMessage::Event { event } => {
                assert_eq!(event.name, "textSizeIncrease");
                assert_eq!(event.payload.unwrap()["current"], 125);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_subscribe_request_defaults() {
        let req: SubscribeRequest = serde_json::from_str("{}").unwrap();
        assert!(!req.snapshot);
        assert!(req.filter.families.is_empty());
    }
}
