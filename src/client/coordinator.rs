//! Cross-tab / cross-window meeting session ownership.
//!
//! A host process may open several sessions (tabs); exactly one may own the
//! live call. Register and claim run through one internal async queue, so
//! a claim can never interleave with another claim or with register's
//! implicit first-owner assignment.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::session::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub has_active_call: bool,
}

impl SessionSnapshot {
    /// A session worth confirming a takeover against.
    pub fn engaged(&self) -> bool {
        self.has_active_call
            || matches!(
                self.state,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Joining
                    | ConnectionState::Joined
                    | ConnectionState::Reconnecting
                    | ConnectionState::Waiting
            )
    }
}

/// The controller surface the coordinator drives.
#[async_trait]
pub trait ManagedSession: Send + Sync {
    fn snapshot(&self) -> SessionSnapshot;

    /// Gives up the call; must complete before ownership moves on.
    async fn relinquish(&self, reason: &str);
}

struct Registered {
    id: String,
    session: Arc<dyn ManagedSession>,
}

#[derive(Default)]
struct Inner {
    sessions: Vec<Registered>,
    owner: Option<String>,
}

impl Inner {
    fn session(&self, id: &str) -> Option<&Arc<dyn ManagedSession>> {
        self.sessions
            .iter()
            .find(|r| r.id == id)
            .map(|r| &r.session)
    }
}

/// Process-wide singleton handed to every session controller.
pub struct MeetingSessionCoordinator {
    inner: Mutex<Inner>,
    weak_self: Weak<MeetingSessionCoordinator>,
}

impl MeetingSessionCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| MeetingSessionCoordinator {
            inner: Mutex::new(Inner::default()),
            weak_self: weak.clone(),
        })
    }

    /// Registers a session. The first registrant becomes owner implicitly;
    /// this assignment is serialized with `claim` through the same lock.
    pub async fn register(
        &self,
        session_id: &str,
        session: Arc<dyn ManagedSession>,
    ) -> RegistrationHandle {
        let mut inner = self.inner.lock().await;
        inner.sessions.retain(|r| r.id != session_id);
        inner.sessions.push(Registered {
            id: session_id.to_string(),
            session,
        });
        if inner.owner.is_none() {
            inner.owner = Some(session_id.to_string());
            debug!(session = session_id, "Implicit session ownership");
        }
        RegistrationHandle {
            coordinator: self.weak_self.upgrade().expect("coordinator alive"),
            session_id: session_id.to_string(),
        }
    }

    /// Claims ownership for `session_id`. If another registered session is
    /// engaged, `confirm` decides the takeover; on approval the current
    /// owner relinquishes before ownership transfers. Returns whether the
    /// claim succeeded.
    pub async fn claim(
        &self,
        session_id: &str,
        confirm: Option<&(dyn Fn() -> bool + Send + Sync)>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.owner.as_deref() == Some(session_id) {
            return true;
        }
        if let Some(owner_id) = inner.owner.clone() {
            if let Some(owner) = inner.session(&owner_id) {
                let snapshot = owner.snapshot();
                if snapshot.engaged() {
                    let approved = confirm.map(|f| f()).unwrap_or(false);
                    if !approved {
                        return false;
                    }
                    let owner = Arc::clone(owner);
                    // completes before the assignment below; the lock keeps
                    // other claims out meanwhile
                    owner.relinquish("takeover").await;
                    info!(from = %owner_id, to = session_id, "Session ownership taken over");
                }
            }
        }
        inner.owner = Some(session_id.to_string());
        true
    }

    pub async fn owner(&self) -> Option<String> {
        self.inner.lock().await.owner.clone()
    }

    /// Drops a registration. Ownership falls to the next engaged session,
    /// else the first remaining, else nobody.
    pub async fn unregister(&self, session_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.sessions.retain(|r| r.id != session_id);
        if inner.owner.as_deref() != Some(session_id) {
            return;
        }
        let next = inner
            .sessions
            .iter()
            .find(|r| r.session.snapshot().engaged())
            .or_else(|| inner.sessions.first())
            .map(|r| r.id.clone());
        inner.owner = next;
        debug!(owner = ?inner.owner, "Session ownership reassigned");
    }
}

/// Unregister handle returned by `register`.
pub struct RegistrationHandle {
    coordinator: Arc<MeetingSessionCoordinator>,
    session_id: String,
}

impl RegistrationHandle {
    pub async fn unregister(self) {
        self.coordinator.unregister(&self.session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StubSession {
        engaged: AtomicBool,
        relinquished: AtomicU32,
    }

    impl StubSession {
        fn new(engaged: bool) -> Arc<Self> {
            Arc::new(StubSession {
                engaged: AtomicBool::new(engaged),
                relinquished: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ManagedSession for StubSession {
        fn snapshot(&self) -> SessionSnapshot {
            SessionSnapshot {
                state: if self.engaged.load(Ordering::SeqCst) {
                    ConnectionState::Joined
                } else {
                    ConnectionState::Disconnected
                },
                has_active_call: self.engaged.load(Ordering::SeqCst),
            }
        }

        async fn relinquish(&self, reason: &str) {
            assert_eq!(reason, "takeover");
            self.engaged.store(false, Ordering::SeqCst);
            self.relinquished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_first_register_owns() {
        let coordinator = MeetingSessionCoordinator::new();
        let tab1 = StubSession::new(false);
        let _h1 = coordinator.register("meet:tab1", tab1).await;
        assert_eq!(coordinator.owner().await.as_deref(), Some("meet:tab1"));
    }

    #[tokio::test]
    async fn test_takeover_requires_confirmation_when_engaged() {
        let coordinator = MeetingSessionCoordinator::new();
        let tab1 = StubSession::new(true);
        let tab2 = StubSession::new(false);
        let _h1 = coordinator.register("meet:tab1", tab1.clone()).await;
        let _h2 = coordinator.register("meet:tab2", tab2).await;

        // declined takeover leaves ownership alone
        let declined = coordinator
            .claim("meet:tab2", Some(&(|| false) as &(dyn Fn() -> bool + Send + Sync)))
            .await;
        assert!(!declined);
        assert_eq!(coordinator.owner().await.as_deref(), Some("meet:tab1"));

        // approved takeover relinquishes the old owner first
        let approved = coordinator
            .claim("meet:tab2", Some(&(|| true) as &(dyn Fn() -> bool + Send + Sync)))
            .await;
        assert!(approved);
        assert_eq!(tab1.relinquished.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.owner().await.as_deref(), Some("meet:tab2"));
    }

    #[tokio::test]
    async fn test_claim_without_engaged_owner_is_silent() {
        let coordinator = MeetingSessionCoordinator::new();
        let tab1 = StubSession::new(false);
        let tab2 = StubSession::new(false);
        let _h1 = coordinator.register("meet:tab1", tab1).await;
        let _h2 = coordinator.register("meet:tab2", tab2).await;

        // no confirmation needed: the owner is idle
        assert!(coordinator.claim("meet:tab2", None).await);
        assert_eq!(coordinator.owner().await.as_deref(), Some("meet:tab2"));
    }

    #[tokio::test]
    async fn test_unregister_falls_to_next_engaged() {
        let coordinator = MeetingSessionCoordinator::new();
        let tab1 = StubSession::new(false);
        let tab2 = StubSession::new(false);
        let tab3 = StubSession::new(true);
        let h1 = coordinator.register("meet:tab1", tab1).await;
        let _h2 = coordinator.register("meet:tab2", tab2).await;
        let _h3 = coordinator.register("meet:tab3", tab3).await;

        h1.unregister().await;
        // tab3 is engaged and wins over the earlier-registered tab2
        assert_eq!(coordinator.owner().await.as_deref(), Some("meet:tab3"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_both_win_without_relinquish() {
        let coordinator = MeetingSessionCoordinator::new();
        let tab1 = StubSession::new(true);
        let tab2 = StubSession::new(false);
        let tab3 = StubSession::new(false);
        let _h1 = coordinator.register("meet:tab1", tab1.clone()).await;
        let _h2 = coordinator.register("meet:tab2", tab2).await;
        let _h3 = coordinator.register("meet:tab3", tab3).await;

        let approve: &(dyn Fn() -> bool + Send + Sync) = &|| true;
        let (a, b) = tokio::join!(
            coordinator.claim("meet:tab2", Some(approve)),
            coordinator.claim("meet:tab3", Some(approve)),
        );
        assert!(a && b);
        // the first winner's relinquish ran before the second claim touched
        // ownership; the engaged original relinquished exactly once
        assert_eq!(tab1.relinquished.load(Ordering::SeqCst), 1);
    }
}
