use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Debounced online/offline observable. Platform connectivity probes feed
/// `report`; subscribers see a transition only once it has held for the
/// debounce window, collapsing flapping. Starts online — when no platform
/// signal is available, online is assumed.
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
    debounce: Duration,
    pending: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(debounce: Duration) -> Self {
        let (tx, _) = watch::channel(true);
        Self {
            tx,
            debounce,
            pending: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Feed a raw connectivity observation. The observable flips only if
    /// the new value still holds after the debounce window.
    pub fn report(&self, online: bool) {
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        if online == *self.tx.borrow() {
            return;
        }
        let tx = self.tx.clone();
        let debounce = self.debounce;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if tx.send_replace(online) != online {
                tracing::info!(online, "Network status changed");
            }
        }));
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}
