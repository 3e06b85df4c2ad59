use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use a11ypulse_ipc::TelemetryEvent;
use anyhow::{Context, Result};
use serde_json::Value;

use crate::ipc::EventBroadcaster;

/// Destination for "feature used" events.
pub trait TelemetrySink: Send + Sync {
    /// Fire-and-forget; must not block the caller.
    fn enqueue_event(&self, name: &str, payload: Option<Value>);

    /// Wait until everything enqueued so far has been handed off.
    /// Returns false if `timeout` elapsed first.
    fn flush(&self, timeout: Duration) -> bool;
}

pub enum EmitterMessage {
    Event(TelemetryEvent),
    Flush(std_mpsc::Sender<()>),
}

/// Sends telemetry events from any thread to the forwarding thread.
/// Uses std::sync::mpsc so that enqueueing never blocks.
pub struct EventEmitter {
    tx: std_mpsc::Sender<EmitterMessage>,
}

impl EventEmitter {
    pub fn new(tx: std_mpsc::Sender<EmitterMessage>) -> Self {
        Self { tx }
    }
}

impl TelemetrySink for EventEmitter {
    fn enqueue_event(&self, name: &str, payload: Option<Value>) {
        let event = TelemetryEvent::new(name, payload);
        if let Err(e) = self.tx.send(EmitterMessage::Event(event)) {
            tracing::debug!("Failed to emit event (forwarder gone?): {}", e);
        }
    }

    fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = std_mpsc::channel();
        if self.tx.send(EmitterMessage::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

/// Forward emitted events to stream subscribers until every emitter is dropped.
pub fn spawn_forwarder(
    rx: std_mpsc::Receiver<EmitterMessage>,
    broadcaster: EventBroadcaster,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("telemetry-forward".to_string())
        .spawn(move || {
            while let Ok(message) = rx.recv() {
                match message {
                    EmitterMessage::Event(event) => {
                        tracing::info!(event = %event.name, payload = ?event.payload, "Telemetry event");
                        broadcaster.send(event);
                    }
                    EmitterMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            tracing::debug!("Telemetry forwarder exiting");
        })
        .context("Failed to spawn telemetry forwarder")
}


#[cfg(test)]
mod tests {
    use super::*;
    use a11ypulse_ipc::names;

    #[test]
    fn test_events_reach_broadcaster_in_order() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let (tx, emitter_rx) = std_mpsc::channel();
        let emitter = EventEmitter::new(tx);
        let forwarder = spawn_forwarder(emitter_rx, broadcaster).unwrap();

        emitter.enqueue_event(names::SESSION_START, None);
        emitter.enqueue_event(
            names::CURSOR_SIZE_CHANGED,
            Some(serde_json::json!({"previous": 32, "current": 48})),
        );
        assert!(emitter.flush(Duration::from_secs(5)));

        assert_eq!(rx.try_recv().unwrap().name, names::SESSION_START);
        let cursor = rx.try_recv().unwrap();
        assert_eq!(cursor.name, names::CURSOR_SIZE_CHANGED);
        assert_eq!(cursor.payload.unwrap()["current"], 48);

        drop(emitter);
        forwarder.join().unwrap();
    }

    #[test]
    fn test_flush_times_out_without_forwarder() {
        let (tx, _rx) = std_mpsc::channel();
        let emitter = EventEmitter::new(tx);
        emitter.enqueue_event(names::SESSION_END, None);
        assert!(!emitter.flush(Duration::from_millis(20)));
    }

    #[test]
    fn test_flush_fails_when_forwarder_is_gone() {
        let (tx, rx) = std_mpsc::channel();
        drop(rx);
        let emitter = EventEmitter::new(tx);
        assert!(!emitter.flush(Duration::from_secs(5)));
    }
}
