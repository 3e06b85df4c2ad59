use std::sync::Arc;
use std::time::Instant;

use a11ypulse_ipc::{names, StatusInfo};
use anyhow::Result;

use crate::core::{ChangeDetector, Config, Feature, StateStore};
use crate::multiplexer::{RegistrationMultiplexer, Subscription};
use crate::platform::Platform;
use crate::process::ProcessWatcher;
use crate::scheduler::SequentialTaskScheduler;
use crate::telemetry::TelemetrySink;

/// Owns every part of a telemetry session: baselines, the worker that
/// serializes checks, the registry watches and the process poller.
pub struct Engine {
    config: Config,
    store: Arc<StateStore>,
    scheduler: SequentialTaskScheduler,
    multiplexer: RegistrationMultiplexer,
    subscriptions: Vec<Subscription>,
    processes: Option<ProcessWatcher>,
    sink: Arc<dyn TelemetrySink>,
}

impl Engine {
    pub fn start(config: Config, platform: Platform, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        let store = Arc::new(StateStore::new());
        let detector = Arc::new(ChangeDetector::new(
            Arc::clone(&store),
            Arc::clone(&platform.settings),
            Arc::clone(&sink),
            &config,
        ));
        let scheduler = SequentialTaskScheduler::new("a11ypulse-worker")?;

        // Baselines must exist before any source can deliver a change
        detector.seed();

        let multiplexer = RegistrationMultiplexer::new(Arc::clone(&platform.notifiers));
        let mut subscriptions = Vec::new();
        for feature in Feature::ALL {
            for key in feature.watch_keys() {
                let subscription = multiplexer.watch(key);
                let handle = scheduler.handle();
                let detector = Arc::clone(&detector);
                let added = subscription.add_listener(move || {
                    let detector = Arc::clone(&detector);
                    handle.submit(move || detector.check(feature));
                });
                match added {
                    Ok(_) => subscriptions.push(subscription),
                    Err(e) => tracing::warn!(
                        "Not watching {} for {}: {:#}",
                        subscription.key(),
                        feature,
                        e
                    ),
                }
            }
        }
        tracing::info!(
            "Watching {} registry keys",
            multiplexer.watched_keys().len()
        );

        let handle = scheduler.handle();
        let process_detector = Arc::clone(&detector);
        let processes = match ProcessWatcher::start(
            Arc::clone(&platform.processes),
            config.watched_processes.iter().map(|p| p.name.clone()),
            config.process_poll_interval(),
            move |name, transition| {
                let detector = Arc::clone(&process_detector);
                handle.submit(move || detector.on_process(&name, transition));
            },
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("Process watching disabled: {:#}", e);
                None
            }
        };

        sink.enqueue_event(names::SESSION_START, None);
        tracing::info!("Engine started");

        Ok(Self {
            config,
            store,
            scheduler,
            multiplexer,
            subscriptions,
            processes,
            sink,
        })
    }

    pub fn status(&self) -> StatusInfo {
        let mut status = self.store.status(Instant::now());
        status.watched_keys = self
            .multiplexer
            .watched_keys()
            .iter()
            .map(|key| key.to_string())
            .collect();
        status.running_processes = self
            .processes
            .as_ref()
            .map(ProcessWatcher::running)
            .unwrap_or_default();
        status
    }

    /// Stop every source, report the session end and wait a bounded time for
    /// the sink to drain before dropping it.
    pub fn shutdown(mut self) {
        tracing::info!("Engine shutting down");
        self.subscriptions.clear();
        if let Some(mut processes) = self.processes.take() {
            processes.stop();
        }
        self.scheduler.shutdown();
        self.multiplexer.shutdown();

        self.sink.enqueue_event(names::SESSION_END, None);
        let timeout = self.config.shutdown_flush_timeout();
        if !self.sink.flush(timeout) {
            tracing::warn!("Telemetry not flushed within {:?}, dropping sink", timeout);
        }
    }
}
