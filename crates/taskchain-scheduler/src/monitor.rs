//! Publishes the device state that task constraints are evaluated against.

use std::sync::Arc;

use taskchain::DeviceState;
use tokio::sync::watch;
use tracing::debug;

/// Shared, observable [`DeviceState`].
///
/// Clones share the same state. Every change wakes tasks waiting on their
/// constraints.
///
/// # Examples
///
/// ```
/// use taskchain::DeviceState;
/// use taskchain_scheduler::ConstraintMonitor;
///
/// let monitor = ConstraintMonitor::new(DeviceState::default());
/// assert!(!monitor.current().charging);
///
/// monitor.set_charging(true);
/// assert!(monitor.current().charging);
/// ```
#[derive(Debug, Clone)]
pub struct ConstraintMonitor {
    tx: Arc<watch::Sender<DeviceState>>,
}

impl ConstraintMonitor {
    /// Starts from `initial`.
    pub fn new(initial: DeviceState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// The current state.
    pub fn current(&self) -> DeviceState {
        *self.tx.borrow()
    }

    /// Replaces the state.
    pub fn set(&self, state: DeviceState) {
        debug!(?state, "device state changed");
        self.tx.send_replace(state);
    }

    /// Modifies the state in place.
    pub fn update(&self, f: impl FnOnce(&mut DeviceState)) {
        self.tx.send_modify(f);
        debug!(state = ?self.current(), "device state changed");
    }

    /// Sets whether the device is charging.
    pub fn set_charging(&self, charging: bool) {
        self.update(|state| state.charging = charging);
    }

    /// Receives every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.tx.subscribe()
    }
}

impl Default for ConstraintMonitor {
    fn default() -> Self {
        Self::new(DeviceState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_updates() {
        let monitor = ConstraintMonitor::default();
        let mut rx = monitor.subscribe();

        let clone = monitor.clone();
        clone.update(|state| state.battery_low = true);

        rx.changed().await.unwrap();
        assert!(rx.borrow().battery_low);
        assert!(monitor.current().battery_low);
    }
}
