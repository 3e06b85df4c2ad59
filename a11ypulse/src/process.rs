use std::collections::BTreeSet;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::platform::ProcessLister;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessTransition {
    Started,
    Stopped,
}

/// Starts and stops between two snapshots of running process names
pub fn diff(
    known: &BTreeSet<String>,
    current: &BTreeSet<String>,
) -> Vec<(String, ProcessTransition)> {
    let started = current
        .difference(known)
        .map(|name| (name.clone(), ProcessTransition::Started));
    let stopped = known
        .difference(current)
        .map(|name| (name.clone(), ProcessTransition::Stopped));
    started.chain(stopped).collect()
}

/// Polls the process list for allow-listed executables.
///
/// Whatever is running at the first successful listing is taken as the
/// baseline and not reported.
pub struct ProcessWatcher {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    running: Arc<Mutex<BTreeSet<String>>>,
}

struct PollState {
    lister: Arc<dyn ProcessLister>,
    allow_list: BTreeSet<String>,
    known: Option<BTreeSet<String>>,
    running: Arc<Mutex<BTreeSet<String>>>,
}

impl PollState {
    fn list(&self) -> Option<BTreeSet<String>> {
        match self.lister.running() {
            Ok(names) => Some(
                names
                    .into_iter()
                    .map(|name| name.to_lowercase())
                    .filter(|name| self.allow_list.contains(name))
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!("Failed to enumerate processes: {:#}", e);
                None
            }
        }
    }

    fn poll(&mut self) -> Vec<(String, ProcessTransition)> {
        let Some(current) = self.list() else {
            return Vec::new();
        };
        let changes = match &self.known {
            Some(known) => diff(known, &current),
            None => {
                tracing::debug!("Process baseline: {:?}", current);
                Vec::new()
            }
        };
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = current.clone();
        self.known = Some(current);
        changes
    }
}

impl ProcessWatcher {
    pub fn start<F>(
        lister: Arc<dyn ProcessLister>,
        names: impl IntoIterator<Item = String>,
        interval: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: Fn(String, ProcessTransition) + Send + 'static,
    {
        let running = Arc::new(Mutex::new(BTreeSet::new()));
        let mut state = PollState {
            lister,
            allow_list: names.into_iter().map(|n| n.to_lowercase()).collect(),
            known: None,
            running: Arc::clone(&running),
        };
        // Seed before returning so that anything already running stays silent
        state.poll();

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("process-watch".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {
                        for (name, transition) in state.poll() {
                            tracing::debug!("Process {} {:?}", name, transition);
                            on_change(name, transition);
                        }
                    }
                    _ => break,
                }
            })
            .context("Failed to spawn process watcher")?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            running,
        })
    }

    /// Allow-listed processes seen at the last successful poll
    pub fn running(&self) -> Vec<String> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Process watcher thread panicked");
            }
        }
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::mock::wait_until;
    use crate::platform::mock::MockProcesses;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn start(
        processes: &Arc<MockProcesses>,
    ) -> (ProcessWatcher, Arc<Mutex<Vec<(String, ProcessTransition)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let watcher = ProcessWatcher::start(
            processes.clone(),
            ["Magnify.exe".to_string(), "narrator.exe".to_string()],
            Duration::from_millis(5),
            move |name, transition| seen_clone.lock().unwrap().push((name, transition)),
        )
        .unwrap();
        (watcher, seen)
    }

    #[test]
    fn test_diff() {
        let changes = diff(&set(&["a.exe", "b.exe"]), &set(&["b.exe", "c.exe"]));
        assert_eq!(
            changes,
            vec![
                ("c.exe".to_string(), ProcessTransition::Started),
                ("a.exe".to_string(), ProcessTransition::Stopped),
            ]
        );
        assert!(diff(&set(&["a.exe"]), &set(&["a.exe"])).is_empty());
    }

    #[test]
    fn test_already_running_is_silent() {
        let processes =
            Arc::new(MockProcesses::new().with_running(&["magnify.exe", "explorer.exe"]));
        let (mut watcher, seen) = start(&processes);
        assert_eq!(watcher.running(), vec!["magnify.exe".to_string()]);

        processes.set_running(&["explorer.exe"]);
        assert!(wait_until(|| !seen.lock().unwrap().is_empty()));
        watcher.stop();

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![("magnify.exe".to_string(), ProcessTransition::Stopped)]
        );
    }

    #[test]
    fn test_start_is_reported_case_insensitively() {
        let processes = Arc::new(MockProcesses::new());
        let (mut watcher, seen) = start(&processes);

        processes.set_running(&["Narrator.EXE", "notepad.exe"]);
        assert!(wait_until(|| !seen.lock().unwrap().is_empty()));
        watcher.stop();

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![("narrator.exe".to_string(), ProcessTransition::Started)]
        );
    }

    /// Block until the watcher has finished at least one full poll after this call
    fn settle(processes: &MockProcesses) {
        let seen = processes.polls();
        assert!(wait_until(|| processes.polls() >= seen + 2));
    }

    #[test]
    fn test_failed_listing_keeps_known_set() {
        let processes = Arc::new(MockProcesses::new().with_running(&["narrator.exe"]));
        let (mut watcher, seen) = start(&processes);

        processes.set_failing();
        settle(&processes);
        assert_eq!(watcher.running(), vec!["narrator.exe".to_string()]);

        processes.set_running(&["narrator.exe"]);
        settle(&processes);
        watcher.stop();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(watcher.running(), vec!["narrator.exe".to_string()]);
    }

    #[test]
    fn test_first_successful_listing_is_baseline() {
        let processes = Arc::new(MockProcesses::new());
        processes.set_failing();
        let (mut watcher, seen) = start(&processes);
        settle(&processes);

        processes.set_running(&["magnify.exe"]);
        assert!(wait_until(|| watcher.running() == vec!["magnify.exe".to_string()]));
        settle(&processes);
        watcher.stop();

        assert!(seen.lock().unwrap().is_empty());
    }
}
