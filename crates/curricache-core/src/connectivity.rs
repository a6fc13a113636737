//! Online/offline tracking.
//!
//! The host feeds connectivity transitions into [`ConnectivityMonitor`]. On
//! reconnect a background resync is requested; while offline the cache
//! serves expired data instead of failing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::sync::SyncBridge;

pub struct ConnectivityMonitor {
    online: AtomicBool,
    bridge: RwLock<SyncBridge>,
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, bridge: SyncBridge) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            online: AtomicBool::new(initially_online),
            bridge: RwLock::new(bridge),
            tx,
        }
    }

    /// Route reconnect resync requests through `bridge` from now on.
    pub fn attach_bridge(&self, bridge: SyncBridge) {
        *self.bridge.write().unwrap_or_else(PoisonError::into_inner) = bridge;
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record the current connectivity. Only transitions have side effects.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }

        self.tx.send_replace(online);
        if online {
            info!("Back online - requesting background sync");
            let bridge = self.bridge.read().unwrap_or_else(PoisonError::into_inner).clone();
            bridge.request_background_sync();
        } else {
            info!("Went offline - serving cached data");
        }
    }

    /// Watch connectivity transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true, SyncBridge::detached())
    }
}

/// Drives a [`ConnectivityMonitor`] from periodic backend probes, for hosts
/// with no platform connectivity events.
pub struct ConnectivityProbe {
    client: ApiClient,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(client: ApiClient, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub fn spawn(self, monitor: Arc<ConnectivityMonitor>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                let reachable = self.client.ping().await;
                debug!(reachable, "Connectivity probe");
                monitor.set_online(reachable);
            }
        })
    }
}
