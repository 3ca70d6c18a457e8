//! Thread-safe published boolean capability state.
//!
//! Holds the last value the bridge published for one capability so it can
//! be read from any task (MQTT `/get` handlers, status output, tests) and
//! updated by the owning device task.
//!
//! Supports live change notification - when the value changes, the update
//! is pushed instantly to any installed watcher.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::watch;

/// Thread-safe boolean capability cell.
///
/// The version is incremented each time the value changes via `set()`,
/// giving readers cheap change detection. A watch notifier can be
/// installed after construction via `set_notifier()`; once installed,
/// every change is pushed to its receivers.
pub struct BooleanCapability {
    state: AtomicBool,
    version: AtomicU32,
    /// Notifier for live change updates.
    /// Installed by whoever wants to observe the cell.
    notifier: RwLock<Option<watch::Sender<bool>>>,
}

impl BooleanCapability {
    /// Create a new capability cell with the given initial value.
    pub fn new(initial: bool) -> Self {
        Self {
            state: AtomicBool::new(initial),
            version: AtomicU32::new(0),
            notifier: RwLock::new(None),
        }
    }

    /// Get the current published value.
    pub fn get(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Get the current version number.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Set the value. Returns `true` (and increments the version) only if
    /// the value actually changed.
    ///
    /// If a notifier is installed, the change is pushed to its receivers.
    pub fn set(&self, value: bool) -> bool {
        let old = self.state.swap(value, Ordering::SeqCst);
        if old == value {
            return false;
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        if let Some(notifier) = self.notifier.read().as_ref() {
            let _ = notifier.send(value);
        }
        true
    }

    /// Install a watch notifier fed on every change.
    ///
    /// The sender is primed with the current value so late subscribers
    /// start from a consistent state.
    pub fn set_notifier(&self, notifier: watch::Sender<bool>) {
        let _ = notifier.send(self.get());
        *self.notifier.write() = Some(notifier);
    }

    /// Install a fresh notifier and return its receiving end.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(self.get());
        *self.notifier.write() = Some(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let cap = BooleanCapability::new(true);
        assert!(cap.get());
        assert_eq!(cap.version(), 0);

        let cap = BooleanCapability::new(false);
        assert!(!cap.get());
        assert_eq!(cap.version(), 0);
    }

    #[test]
    fn test_set_increments_version_on_change_only() {
        let cap = BooleanCapability::new(false);

        assert!(cap.set(true));
        assert!(cap.get());
        assert_eq!(cap.version(), 1);

        // Setting same value is a no-op.
        assert!(!cap.set(true));
        assert_eq!(cap.version(), 1);

        assert!(cap.set(false));
        assert_eq!(cap.version(), 2);
    }

    #[test]
    fn test_subscribe_sees_changes() {
        let cap = BooleanCapability::new(false);
        let rx = cap.subscribe();
        assert!(!*rx.borrow());

        cap.set(true);
        assert!(*rx.borrow());
    }
}
