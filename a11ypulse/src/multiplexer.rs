use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread;

use anyhow::{bail, Context, Result};

/// Identity of a watched OS resource (a registry key path on Windows).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey(String);

impl WatchKey {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A one-shot OS change notification for a single opened resource.
///
/// Each successful `arm` must lead to at most one `WaitHandle::signal`, when
/// the resource next changes. After that the notifier has to be armed again.
pub trait ChangeNotifier: Send + Sync {
    fn arm(&self, handle: WaitHandle) -> Result<()>;
}

/// Opens the OS resource behind a key. Dropping the returned notifier releases it.
pub trait NotifierFactory: Send + Sync {
    fn open(&self, key: &WatchKey) -> Result<Box<dyn ChangeNotifier>>;
}

pub type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handed to `ChangeNotifier::arm`; consumed when the OS reports the change.
pub struct WaitHandle {
    registration: u64,
    signals: Weak<Signals>,
}

impl WaitHandle {
    pub fn signal(self) {
        if let Some(signals) = self.signals.upgrade() {
            signals.fire(self.registration);
        }
    }
}

#[derive(Default)]
struct SignalState {
    fired: Vec<u64>,
    pool_updated: bool,
    stopped: bool,
}

/// The "wait for any handle, or for the pool-updated signal" primitive.
#[derive(Default)]
struct Signals {
    state: Mutex<SignalState>,
    cv: Condvar,
}

impl Signals {
    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, registration: u64) {
        self.lock().fired.push(registration);
        self.cv.notify_all();
    }

    fn pool_updated(&self) {
        self.lock().pool_updated = true;
        self.cv.notify_all();
    }

    fn stop(&self) {
        self.lock().stopped = true;
        self.cv.notify_all();
    }

    /// Blocks until something fired or the pool changed. Returns the fired
    /// registrations, or `None` once stopped.
    fn wait(&self) -> Option<Vec<u64>> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return None;
            }
            if state.pool_updated || !state.fired.is_empty() {
                state.pool_updated = false;
                return Some(std::mem::take(&mut state.fired));
            }
            state = self.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct Registration {
    id: u64,
    key: WatchKey,
    notifier: Box<dyn ChangeNotifier>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    /// Last listener left; retire on the next fire instead of re-arming.
    disposed: AtomicBool,
    /// A wait is outstanding with the OS.
    pending: AtomicBool,
}

impl Registration {
    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Pool {
    entries: HashMap<WatchKey, Arc<Registration>>,
    thread_running: bool,
    stopped: bool,
    next_id: u64,
}

struct Inner {
    factory: Arc<dyn NotifierFactory>,
    pool: Mutex<Pool>,
    signals: Arc<Signals>,
    next_listener: AtomicU64,
}

/// Turns many one-shot OS change notifications into durable, many-listener
/// subscriptions, serviced by a single background thread.
///
/// Per key the lifecycle is Idle -> Armed -> Fired -> Armed ... -> Lapsing -> Gone.
/// A lapsing entry cannot cancel its outstanding OS wait, so listeners must
/// tolerate one late callback after they unsubscribe.
#[derive(Clone)]
pub struct RegistrationMultiplexer {
    inner: Arc<Inner>,
}

impl RegistrationMultiplexer {
    pub fn new(factory: Arc<dyn NotifierFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                pool: Mutex::new(Pool::default()),
                signals: Arc::new(Signals::default()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Nothing is opened until the first listener is added.
    pub fn watch(&self, key: WatchKey) -> Subscription {
        Subscription {
            inner: Arc::clone(&self.inner),
            key,
            owned: Mutex::new(Vec::new()),
        }
    }

    pub fn watched_keys(&self) -> Vec<WatchKey> {
        let pool = self.inner.lock_pool();
        let mut keys: Vec<_> = pool
            .entries
            .values()
            .filter(|r| !r.disposed.load(Ordering::SeqCst))
            .map(|r| r.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_pool().thread_running
    }

    /// Drop every registration and stop the background thread. Outstanding OS
    /// waits are released together with their notifiers.
    pub fn shutdown(&self) {
        let entries = {
            let mut pool = self.inner.lock_pool();
            pool.stopped = true;
            std::mem::take(&mut pool.entries)
        };
        self.inner.signals.stop();
        tracing::debug!("Registration multiplexer stopped ({} watches)", entries.len());
    }
}

impl Inner {
    fn lock_pool(&self) -> std::sync::MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_handle(&self, registration: u64) -> WaitHandle {
        WaitHandle {
            registration,
            signals: Arc::downgrade(&self.signals),
        }
    }

    fn add_listener(self: &Arc<Self>, key: &WatchKey, listener: Listener) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let mut pool = self.lock_pool();
        if pool.stopped {
            bail!("Registration multiplexer is stopped");
        }

        if let Some(registration) = pool.entries.get(key) {
            if registration.disposed.swap(false, Ordering::SeqCst) {
                tracing::debug!("Reviving lapsing watch on {}", key);
            }
            registration.listeners().push((id, listener));
            return Ok(id);
        }

        // Idle -> Armed
        let notifier = self
            .factory
            .open(key)
            .with_context(|| format!("Failed to open {}", key))?;
        let registration = Arc::new(Registration {
            id: pool.next_id,
            key: key.clone(),
            notifier,
            listeners: Mutex::new(vec![(id, listener)]),
            disposed: AtomicBool::new(false),
            pending: AtomicBool::new(true),
        });
        pool.next_id += 1;

        if let Err(e) = registration
            .notifier
            .arm(self.wait_handle(registration.id))
        {
            return Err(e.context(format!("Failed to arm change notification for {}", key)));
        }

        // Spawn before inserting: on failure the registration is dropped with
        // its notifier and nothing is left behind under this key.
        if !pool.thread_running {
            let inner = Arc::clone(self);
            thread::Builder::new()
                .name("watch-multiplexer".to_string())
                .spawn(move || inner.run())
                .context("Failed to spawn multiplexer thread")?;
            pool.thread_running = true;
            tracing::debug!("Multiplexer thread started");
        }

        pool.entries.insert(key.clone(), registration);
        tracing::debug!("Watching {}", key);
        drop(pool);

        self.signals.pool_updated();
        Ok(id)
    }

    fn remove_listener(&self, key: &WatchKey, id: ListenerId) -> bool {
        let mut pool = self.lock_pool();
        let Some(registration) = pool.entries.get(key).cloned() else {
            return false;
        };

        let now_empty = {
            let mut listeners = registration.listeners();
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            if listeners.len() == before {
                return false;
            }
            listeners.is_empty()
        };

        if now_empty {
            // Armed -> Lapsing; the OS wait cannot be cancelled.
            registration.disposed.store(true, Ordering::SeqCst);
            if registration.pending.load(Ordering::SeqCst) {
                tracing::debug!("Watch on {} lapsing until its next notification", key);
            } else {
                pool.entries.remove(key);
                drop(pool);
                tracing::debug!("Watch on {} removed", key);
                self.signals.pool_updated();
            }
        }
        true
    }

    fn run(self: Arc<Self>) {
        loop {
            // Immutable copy for this wait; the subscribe path keeps mutating the pool.
            let snapshot: HashMap<u64, Arc<Registration>> = {
                let mut pool = self.lock_pool();
                if pool.entries.is_empty() || pool.stopped {
                    pool.thread_running = false;
                    tracing::debug!("Multiplexer thread exiting");
                    return;
                }
                pool.entries
                    .values()
                    .map(|r| (r.id, Arc::clone(r)))
                    .collect()
            };

            let Some(fired) = self.signals.wait() else {
                self.lock_pool().thread_running = false;
                return;
            };

            for id in fired {
                let registration = match snapshot.get(&id) {
                    Some(r) => Some(Arc::clone(r)),
                    None => self
                        .lock_pool()
                        .entries
                        .values()
                        .find(|r| r.id == id)
                        .cloned(),
                };
                match registration {
                    Some(registration) => self.on_fired(&registration),
                    None => tracing::debug!("Ignoring notification for retired watch {}", id),
                }
            }
        }
    }

    fn on_fired(&self, registration: &Arc<Registration>) {
        // Lapsed or revived is decided under the pool lock, so a concurrent
        // add_listener either revives the entry before this check or finds it gone.
        {
            let mut pool = self.lock_pool();
            registration.pending.store(false, Ordering::SeqCst);
            if registration.disposed.load(Ordering::SeqCst) {
                retire(&mut pool, registration, "lapsed");
                return;
            }
        }

        let listeners: Vec<Listener> = registration
            .listeners()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        tracing::debug!(
            "{} changed, notifying {} listeners",
            registration.key,
            listeners.len()
        );
        for listener in listeners {
            dispatch(&registration.key, listener);
        }

        // Fired -> Armed
        let mut pool = self.lock_pool();
        if pool.stopped {
            return;
        }
        if registration.disposed.load(Ordering::SeqCst) {
            retire(&mut pool, registration, "lapsed");
            return;
        }
        registration.pending.store(true, Ordering::SeqCst);
        if let Err(e) = registration
            .notifier
            .arm(self.wait_handle(registration.id))
        {
            registration.pending.store(false, Ordering::SeqCst);
            tracing::debug!("Re-arming {} failed: {:#}", registration.key, e);
            retire(&mut pool, registration, "re-arm failed");
        }
    }
}

/// Caller holds the pool lock. A newer registration under the same key is left alone.
fn retire(pool: &mut Pool, registration: &Arc<Registration>, reason: &str) {
    let is_current = pool
        .entries
        .get(&registration.key)
        .is_some_and(|r| Arc::ptr_eq(r, registration));
    if is_current {
        pool.entries.remove(&registration.key);
        tracing::debug!("Watch on {} gone ({})", registration.key, reason);
    }
}

/// Each listener runs on its own thread so a slow or panicking listener
/// cannot hold up the others or the next wait.
fn dispatch(key: &WatchKey, listener: Listener) {
    let spawned = thread::Builder::new()
        .name("watch-dispatch".to_string())
        .spawn(move || listener());
    if let Err(e) = spawned {
        tracing::warn!("Failed to dispatch change of {}: {}", key, e);
    }
}

/// Listener handle for one watched key. Dropping it removes every listener it added.
pub struct Subscription {
    inner: Arc<Inner>,
    key: WatchKey,
    owned: Mutex<Vec<ListenerId>>,
}

impl Subscription {
    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.add_listener(&self.key, Arc::new(listener))?;
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        Ok(id)
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|owned| *owned != id);
        self.inner.remove_listener(&self.key, id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let owned = std::mem::take(self.owned.get_mut().unwrap_or_else(PoisonError::into_inner));
        for id in owned {
            self.inner.remove_listener(&self.key, id);
        }
    }
}
