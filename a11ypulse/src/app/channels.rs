use std::sync::mpsc as std_mpsc;

use tokio::sync::mpsc;

use a11ypulse_ipc::{Command, Response, TelemetryEvent};

use crate::ipc::{EventBroadcaster, EventServer, IpcServer};
use crate::telemetry::EmitterMessage;

pub type IpcCommandWithResponse = (Command, mpsc::Sender<Response>);

pub struct IpcRelay {
    pub cmd_tx: std_mpsc::Sender<IpcCommandWithResponse>,
    pub server_tx: mpsc::Sender<IpcCommandWithResponse>,
    pub server_rx: mpsc::Receiver<IpcCommandWithResponse>,
}

pub struct EventStreaming {
    pub broadcaster: EventBroadcaster,
    pub event_server_rx: tokio::sync::broadcast::Receiver<TelemetryEvent>,
}

pub struct TokioChannels {
    pub ipc: IpcRelay,
    pub events: EventStreaming,
}

pub struct MainChannels {
    pub ipc_cmd_rx: std_mpsc::Receiver<IpcCommandWithResponse>,
    pub telemetry_tx: std_mpsc::Sender<EmitterMessage>,
    pub telemetry_rx: std_mpsc::Receiver<EmitterMessage>,
}

pub fn create_channels() -> (TokioChannels, MainChannels) {
    // Channel: IPC commands (tokio -> main thread)
    let (ipc_cmd_tx, ipc_cmd_rx) = std_mpsc::channel::<IpcCommandWithResponse>();

    // Channel for IPC servers (tokio internal)
    let (ipc_server_tx, ipc_server_rx) = mpsc::channel::<IpcCommandWithResponse>(256);

    // Event broadcasting for telemetry streaming
    let event_broadcaster = EventBroadcaster::new(256);
    let event_server_rx = event_broadcaster.subscribe();

    // Channel: telemetry events (any thread -> forwarder)
    let (telemetry_tx, telemetry_rx) = std_mpsc::channel::<EmitterMessage>();

    let tokio_channels = TokioChannels {
        ipc: IpcRelay {
            cmd_tx: ipc_cmd_tx,
            server_tx: ipc_server_tx,
            server_rx: ipc_server_rx,
        },
        events: EventStreaming {
            broadcaster: event_broadcaster,
            event_server_rx,
        },
    };

    let main_channels = MainChannels {
        ipc_cmd_rx,
        telemetry_tx,
        telemetry_rx,
    };

    (tokio_channels, main_channels)
}

pub async fn run_async(channels: TokioChannels, control_addr: String, event_addr: String) {
    // Destructure for partial moves
    let TokioChannels { ipc, events } = channels;
    let IpcRelay {
        cmd_tx: ipc_cmd_tx,
        server_tx: ipc_server_tx,
        server_rx: mut ipc_rx,
    } = ipc;

    tracing::info!("Tokio runtime started");

    // Start IPC server
    let ipc_server = IpcServer::new(&control_addr, ipc_server_tx.clone());
    tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            tracing::error!("IPC server error: {:#}", e);
        }
    });

    // Start Event server; snapshots are answered by the main thread via Status
    let event_server =
        EventServer::new(&event_addr, events.event_server_rx, ipc_server_tx.clone());
    tokio::spawn(async move {
        if let Err(e) = event_server.run().await {
            tracing::error!("Event server error: {:#}", e);
        }
    });

    // Ctrl-C goes through the same path as `a11ypulse quit`
    let quit_tx = ipc_server_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            crate::ipc::request(&quit_tx, Command::Quit).await;
        }
    });

    while let Some((cmd, resp_tx)) = ipc_rx.recv().await {
        // Forward IPC commands to main thread
        if ipc_cmd_tx.send((cmd, resp_tx)).is_err() {
            tracing::error!("Failed to forward IPC command to main thread");
            break;
        }
    }

    tracing::info!("Tokio runtime exiting");
}
