mod channels;
mod command;

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use a11ypulse_ipc::Command;

use crate::core::Config;
use crate::engine::Engine;
use crate::platform::Platform;
use crate::telemetry::{self, EventEmitter};
use channels::IpcCommandWithResponse;

pub struct App {}

impl App {
    pub fn run(config: Config) -> Result<()> {
        let (tokio_channels, main_channels) = channels::create_channels();

        telemetry::spawn_forwarder(
            main_channels.telemetry_rx,
            tokio_channels.events.broadcaster.clone(),
        )?;

        // Spawn tokio runtime in separate thread
        let control_addr = config.control_addr.clone();
        let event_addr = config.event_addr.clone();
        thread::Builder::new()
            .name("tokio-runtime".to_string())
            .spawn(move || match tokio::runtime::Runtime::new() {
                Ok(rt) => {
                    rt.block_on(channels::run_async(tokio_channels, control_addr, event_addr))
                }
                Err(e) => tracing::error!("Failed to start tokio runtime: {}", e),
            })
            .context("Failed to spawn tokio thread")?;

        let sink = Arc::new(EventEmitter::new(main_channels.telemetry_tx));
        let engine = Engine::start(config, Platform::system(), sink)?;

        run_main_loop(&engine, main_channels.ipc_cmd_rx);

        engine.shutdown();
        tracing::info!("a11ypulse stopped");
        Ok(())
    }
}

fn run_main_loop(engine: &Engine, ipc_cmd_rx: std_mpsc::Receiver<IpcCommandWithResponse>) {
    tracing::info!("Starting main loop");

    while let Ok((cmd, resp_tx)) = ipc_cmd_rx.recv() {
        tracing::debug!("Received IPC command: {:?}", cmd);
        let response = command::process_command(engine, &cmd);
        let _ = resp_tx.blocking_send(response);

        // Handle Quit command after sending response
        if matches!(cmd, Command::Quit) {
            break;
        }
    }

    tracing::info!("Main loop exited");
}
