//! Registry of running block sessions, keyed by target IP.
//!
//! Each session runs as its own tokio task with its own sender, so sessions
//! never contend on the medium. The registry is the only shared state: one
//! mutex over the table, never held across an await.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::block::{BlockSession, BlockState};
use crate::error::{Result, SessionError};
use crate::network::FrameSender;

struct SessionHandle {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Supervises concurrent block sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Ipv4Addr, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the block loop of a resolved session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(&self, mut session: BlockSession<S>) -> Result<()>
    where
        S: FrameSender + 'static,
    {
        let target = session.target_ip();
        if session.state() != BlockState::Active {
            return Err(SessionError::NotResolved(target).into());
        }

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&target) {
            return Err(SessionError::AlreadyActive(target).into());
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let task = tokio::spawn(async move {
            session.run(&flag).await;
            session.shutdown();
        });

        sessions.insert(target, SessionHandle { running, task });
        Ok(())
    }

    /// Stop the session for `target`, waiting for its loop to finish.
    ///
    /// Returns `false` if no session was registered for it.
    pub async fn stop(&self, target: Ipv4Addr) -> bool {
        let Some(handle) = self.sessions.lock().remove(&target) else {
            return false;
        };

        Self::finish(target, handle).await;
        true
    }

    /// Stop every session.
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self.sessions.lock().drain().collect();
        for (_, handle) in &handles {
            handle.running.store(false, Ordering::SeqCst);
        }
        for (target, handle) in handles {
            Self::finish(target, handle).await;
        }
    }

    async fn finish(target: Ipv4Addr, handle: SessionHandle) {
        handle.running.store(false, Ordering::SeqCst);
        if let Err(err) = handle.task.await {
            warn!("Block task for {target} failed: {err}");
        }
        info!("Stopped blocking {target}");
    }

    pub fn is_blocking(&self, target: Ipv4Addr) -> bool {
        self.sessions.lock().contains_key(&target)
    }

    /// Targets currently blocked, ordered by IP.
    pub fn targets(&self) -> Vec<Ipv4Addr> {
        let mut targets: Vec<_> = self.sessions.lock().keys().copied().collect();
        targets.sort_unstable();
        targets
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pnet::ipnetwork::Ipv4Network;
    use pnet::util::MacAddr;

    use super::*;
    use crate::block::BlockConfig;
    use crate::config::{Sink, Strategy};
    use crate::network::{InterfaceDescriptor, MockCapture, MockSender};

    const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn descriptor() -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: "eth0".into(),
            mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x64),
            network: Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 100), 24).unwrap(),
            gateway: Some(GATEWAY),
        }
    }

    fn session(target: Ipv4Addr, sender: MockSender, resolve: bool) -> BlockSession<MockSender> {
        let config = BlockConfig {
            interval: Duration::from_secs(1),
            resolve_attempts: 1,
            resolve_timeout: Duration::from_millis(5),
            strategy: Strategy::Bidirectional,
            sink: Sink::Blackhole,
            restore_on_shutdown: true,
        };
        let mut session = BlockSession::new(&descriptor(), target, config, sender).unwrap();
        if resolve {
            session.set_peer_mac(target, MacAddr::new(0x02, 0, 0, 0, 0, 0x32));
            session.set_peer_mac(GATEWAY, MacAddr::new(0x02, 0, 0, 0, 0, 0x01));
            session.resolve(&mut MockCapture::new(vec![])).unwrap();
        }
        session
    }

    #[tokio::test(start_paused = true)]
    async fn should_track_started_sessions() {
        let registry = SessionRegistry::new();
        let a = Ipv4Addr::new(10, 0, 0, 20);
        let b = Ipv4Addr::new(10, 0, 0, 5);

        registry.start(session(a, MockSender::new(), true)).unwrap();
        registry.start(session(b, MockSender::new(), true)).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.is_blocking(a));
        assert_eq!(registry.targets(), vec![b, a]);

        registry.stop_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_duplicate_target() {
        let registry = SessionRegistry::new();
        let target = Ipv4Addr::new(10, 0, 0, 20);

        registry.start(session(target, MockSender::new(), true)).unwrap();
        let result = registry.start(session(target, MockSender::new(), true));

        assert!(matches!(
            result,
            Err(crate::Error::Session(SessionError::AlreadyActive(ip))) if ip == target
        ));
        registry.stop_all().await;
    }

    #[tokio::test]
    async fn should_reject_unresolved_session() {
        let registry = SessionRegistry::new();
        let target = Ipv4Addr::new(10, 0, 0, 20);

        let result = registry.start(session(target, MockSender::new(), false));
        assert!(matches!(
            result,
            Err(crate::Error::Session(SessionError::NotResolved(_)))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_restore_when_stopped() {
        let registry = SessionRegistry::new();
        let target = Ipv4Addr::new(10, 0, 0, 20);
        let sender = MockSender::new();

        registry.start(session(target, sender.clone(), true)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let poisoned = sender.sent_count();
        assert_eq!(poisoned, 2);

        assert!(registry.stop(target).await);
        assert!(!registry.is_blocking(target));
        // Two restore frames follow the forged round
        assert_eq!(sender.sent_count(), poisoned + 2);

        assert!(!registry.stop(target).await);
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_one_session_without_touching_others() {
        let registry = SessionRegistry::new();
        let a = Ipv4Addr::new(10, 0, 0, 20);
        let b = Ipv4Addr::new(10, 0, 0, 21);
        let sender_b = MockSender::new();

        registry.start(session(a, MockSender::new(), true)).unwrap();
        registry.start(session(b, sender_b.clone(), true)).unwrap();

        assert!(registry.stop(a).await);
        let before = sender_b.sent_count();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(registry.is_blocking(b));
        assert!(sender_b.sent_count() > before);
        registry.stop_all().await;
    }
}
