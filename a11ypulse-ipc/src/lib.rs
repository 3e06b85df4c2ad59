pub mod command;
pub mod event;

pub use command::{Command, DisplayStatus, Response, StatusInfo, ThemeObservation};
pub use event::{
    names, EventFilter, FeatureFamily, StreamMessage, SubscribeRequest, TelemetryEvent,
};
