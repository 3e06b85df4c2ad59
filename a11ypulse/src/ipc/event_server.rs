use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use a11ypulse_ipc::{Command, Response, StreamMessage, SubscribeRequest, TelemetryEvent};

use super::server::request;

/// Streams telemetry events to TCP subscribers as JSON lines
pub struct EventServer {
    addr: String,
    event_rx: broadcast::Receiver<TelemetryEvent>,
    cmd_tx: mpsc::Sender<(Command, mpsc::Sender<Response>)>,
}

impl EventServer {
    pub fn new(
        addr: &str,
        event_rx: broadcast::Receiver<TelemetryEvent>,
        cmd_tx: mpsc::Sender<(Command, mpsc::Sender<Response>)>,
    ) -> Self {
        Self {
            addr: addr.to_string(),
            event_rx,
            cmd_tx,
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind event server to {}", self.addr))?;
        tracing::info!("Event server listening on {}", self.addr);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let event_rx = self.event_rx.resubscribe();
                    let cmd_tx = self.cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, event_rx, cmd_tx).await {
                            tracing::debug!("Event subscriber disconnected: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Event server accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        mut event_rx: broadcast::Receiver<TelemetryEvent>,
        cmd_tx: mpsc::Sender<(Command, mpsc::Sender<Response>)>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        // Read subscribe request
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(()); // EOF
        }

        let subscription: SubscribeRequest =
            serde_json::from_str(line.trim()).unwrap_or_default();
        tracing::debug!("New event subscriber with filter: {:?}", subscription.filter);

        if subscription.snapshot {
            match request(&cmd_tx, Command::Status).await {
                Response::Status { status } => {
                    write_message(&mut writer, &StreamMessage::Snapshot { status }).await?;
                }
                other => tracing::warn!("Snapshot unavailable: {:?}", other),
            }
        }

        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if subscription.filter.matches(&event) {
                        write_message(&mut writer, &StreamMessage::Event { event }).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event subscriber lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &StreamMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Event broadcaster that holds the sender side of the broadcast channel
#[derive(Clone)]
pub struct EventBroadcaster {
    event_tx: broadcast::Sender<TelemetryEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Get a receiver for the event server
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.event_tx.subscribe()
    }

    /// Send an event to all subscribers
    pub fn send(&self, event: TelemetryEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11ypulse_ipc::{names, EventFilter, FeatureFamily, StatusInfo};

    #[tokio::test]
    async fn test_snapshot_then_filtered_events() {
        let broadcaster = EventBroadcaster::new(16);
        let event_rx = broadcaster.subscribe();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<(Command, mpsc::Sender<Response>)>(4);
        tokio::spawn(async move {
            while let Some((_cmd, resp_tx)) = cmd_rx.recv().await {
                let status = StatusInfo {
                    cursor_size: Some(48),
                    ..Default::default()
                };
                let _ = resp_tx.send(Response::Status { status }).await;
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = EventServer::handle_connection(stream, event_rx, cmd_tx).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let subscribe = SubscribeRequest {
            snapshot: true,
            filter: EventFilter::only([FeatureFamily::Theme]),
        };
        let json = serde_json::to_string(&subscribe).unwrap();
        client.write_all(json.as_bytes()).await.unwrap();
        client.write_all(b"\n").await.unwrap();

        let mut lines = BufReader::new(client).lines();
        let snapshot: StreamMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(
            snapshot,
            StreamMessage::Snapshot { status } if status.cursor_size == Some(48)
        ));

        broadcaster.send(TelemetryEvent::new(names::HIGH_CONTRAST_ON, None));
        broadcaster.send(TelemetryEvent::new(names::DARK_MODE_ON, None));

        let event: StreamMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(
            event,
            StreamMessage::Event { event } if event.name == names::DARK_MODE_ON
        ));
    }
}
