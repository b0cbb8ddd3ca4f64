use tokio::sync::watch;

/// Connectivity source injected into the session store. Implementations
/// wrap whatever the host environment exposes (browser online/offline
/// events, OS reachability); tests drive a channel by hand. Subscribing
/// never registers process-wide listeners, so independent store instances
/// cannot double-register.
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Channel carrying the current online flag; a new receiver per call.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-channel-backed monitor. The producer side (`set_online`) is driven
/// by host glue or by tests.
pub struct WatchNetworkMonitor {
    tx: watch::Sender<bool>,
}

impl WatchNetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        // send_replace so the value updates even with no live receivers
        let _ = self.tx.send_replace(online);
    }
}

impl NetworkMonitor for WatchNetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_reach_subscribers() {
        let monitor = WatchNetworkMonitor::new(true);
        let mut rx = monitor.subscribe();
        assert!(monitor.is_online());

        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
        assert!(!monitor.is_online());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[test]
    fn set_online_without_subscribers_does_not_panic() {
        let monitor = WatchNetworkMonitor::new(false);
        monitor.set_online(true);
        assert!(monitor.is_online());
    }
}
