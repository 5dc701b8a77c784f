//! Liveness monitor
//!
//! Two independent periodic loops, each restartable when its interval is
//! reconfigured:
//!
//! - the **ping loop** sweeps registry entries whose socket vanished without
//!   a close event, then pings every session; one that missed the previous
//!   pong gets a `terminate` debout and is cut loose after a short grace
//! - the **nudge loop** broadcasts `nudge{time, interval}` so clients can
//!   tell "hub unreachable" apart from "my own timers were suspended"

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::registry::PeerRegistry;
use crate::router::HubRouter;
use crate::session::OutboundFrame;

/// Delay between noticing a dead session and terminating its socket
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

pub struct LivenessMonitor {
    registry: Arc<PeerRegistry>,
    router: Arc<HubRouter>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
    nudge_task: Mutex<Option<JoinHandle<()>>>,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<PeerRegistry>, router: Arc<HubRouter>) -> Self {
        Self {
            registry,
            router,
            ping_task: Mutex::new(None),
            nudge_task: Mutex::new(None),
        }
    }

    /// (Re)start the ping loop; 0 disables it
    pub fn start_ping(&self, interval_ms: u64) {
        if let Some(task) = self.ping_task.lock().take() {
            task.abort();
        }
        if interval_ms == 0 {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let router = Arc::clone(&self.router);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the immediate first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ping_cycle(&registry, &router);
            }
        });
        *self.ping_task.lock() = Some(task);
    }

    /// (Re)start the nudge loop; 0 disables it
    pub fn start_nudge(&self, interval_ms: u64) {
        if let Some(task) = self.nudge_task.lock().take() {
            task.abort();
        }
        if interval_ms == 0 {
            return;
        }
        let router = Arc::clone(&self.router);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                router.broadcast_nudge(interval_ms);
            }
        });
        *self.nudge_task.lock() = Some(task);
    }

    pub fn shutdown(&self) {
        if let Some(task) = self.ping_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.nudge_task.lock().take() {
            task.abort();
        }
    }
}

/// One ping cycle: sweep vanished sockets, then test every live one
pub(crate) fn ping_cycle(registry: &Arc<PeerRegistry>, router: &Arc<HubRouter>) {
    for (session, record) in registry.snapshot() {
        if record.is_gone() {
            debug!(peer = %record.info.id, "Sweeping session without a socket");
            router.fan_out_leave(session);
            registry.evict(session);
        }
    }

    for (session, record) in registry.snapshot() {
        let was_alive = registry.with_session(session, |r| {
            let was = r.state.alive;
            r.state.alive = false;
            was
        });
        match was_alive {
            Some(true) => {
                record.send(OutboundFrame::Ping);
            }
            Some(false) => {
                warn!(peer = %record.info.id, "Peer did not pong back, terminating");
                router.report_termination(session);
                let registry = Arc::clone(registry);
                tokio::spawn(async move {
                    tokio::time::sleep(TERMINATE_GRACE).await;
                    registry.send_to_session(session, OutboundFrame::Terminate);
                });
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypting::Crypting;
    use crate::debout::DeboutBroadcaster;
    use tokio::sync::mpsc;

    fn router_for(registry: &Arc<PeerRegistry>) -> Arc<HubRouter> {
        let crypting = Arc::new(Crypting::new(None));
        let debout = Arc::new(DeboutBroadcaster::new(false, Arc::clone(registry)));
        Arc::new(HubRouter::new(Arc::clone(registry), crypting, debout))
    }

    #[tokio::test]
    async fn test_responsive_session_gets_pinged() {
        let registry = PeerRegistry::new();
        let router = router_for(&registry);
        let (tx, mut rx) = mpsc::channel(8);
        let (session, _) = registry.register(tx, None);

        ping_cycle(&registry, &router);
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Ping)));
        // alive flag is now cleared, waiting for the pong
        assert_eq!(
            registry.read_session(session, |r| r.state.alive),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_silent_session_is_terminated_on_second_cycle() {
        let registry = PeerRegistry::new();
        let router = router_for(&registry);
        let (tx, mut rx) = mpsc::channel(8);
        let (_session, _) = registry.register(tx, None);

        ping_cycle(&registry, &router);
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Ping)));

        // No pong arrives; the next cycle schedules termination
        ping_cycle(&registry, &router);
        tokio::time::sleep(TERMINATE_GRACE * 3).await;
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Terminate)));
    }

    #[tokio::test]
    async fn test_pong_keeps_session_alive() {
        let registry = PeerRegistry::new();
        let router = router_for(&registry);
        let (tx, mut rx) = mpsc::channel(8);
        let (session, _) = registry.register(tx, None);

        ping_cycle(&registry, &router);
        let _ = rx.try_recv();
        // Pong arrives between cycles
        registry.with_session(session, |r| r.state.alive = true);

        ping_cycle(&registry, &router);
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Ping)));
    }

    #[tokio::test]
    async fn test_sweep_evicts_vanished_sockets() {
        let registry = PeerRegistry::new();
        let router = router_for(&registry);
        let (tx, rx) = mpsc::channel(8);
        let (_session, _) = registry.register(tx, None);
        drop(rx);

        ping_cycle(&registry, &router);
        assert!(registry.is_empty());
    }
}
