//! Connectivity state and transition observers.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

type Observer = Box<dyn Fn() + Send + Sync>;

/// Observes transitions between online and offline.
///
/// The monitor itself does not probe the network; the host integration
/// feeds reachability changes in through [`set_online`](Self::set_online)
/// (from an OS notification, an interface watcher, or a periodic probe -
/// whatever the platform offers). State is best-effort either way: a
/// reported "online" can still fail at submission time, which is why the
/// sync pass treats submission failures as routine.
///
/// Observers fire on actual transitions only, in registration order, on
/// the thread that reported the change. There is no unregistration;
/// observers live as long as the monitor.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    on_online: RwLock<Vec<Observer>>,
    on_offline: RwLock<Vec<Observer>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            on_online: RwLock::new(Vec::new()),
            on_offline: RwLock::new(Vec::new()),
        }
    }

    /// Returns true if the host currently has no network reachability.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        !self.online.load(Ordering::SeqCst)
    }

    /// Registers an observer for offline -> online transitions.
    ///
    /// Observers must not register further observers from inside the
    /// callback; the observer list is locked while it fires.
    pub fn on_online(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_online.write().push(Box::new(callback));
    }

    /// Registers an observer for online -> offline transitions.
    pub fn on_offline(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_offline.write().push(Box::new(callback));
    }

    /// Reports the current reachability state.
    ///
    /// Observers fire only when the state actually changes; repeated
    /// reports of the same state are absorbed silently.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        let observers = if online {
            self.on_online.read()
        } else {
            self.on_offline.read()
        };
        for observer in observers.iter() {
            observer();
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &!self.is_offline())
            .finish_non_exhaustive()
    }
}
