use crate::error::AuthSyncError;
use crate::provider::{IdentityProvider, Subscription};
use crate::service::profile_sync::ProfileSynchronizer;
use crate::service::session_store::SessionStore;
use crate::types::{AuthEvent, ProfileSyncStatus, SessionChange, SessionEvent};
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Messages handled by the auth event actor.
#[derive(Debug)]
pub enum AuthEventMessage {
    /// Session change reported by the identity provider.
    Provider(SessionChange),
    /// Register an observer; it receives every event processed after this one.
    Subscribe(RpcReplyPort<AuthObserver>),
    Unsubscribe(u64),
}

/// Receiving end of a bus registration.
#[derive(Debug)]
pub struct AuthObserver {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthEvent>,
    bus: ActorRef<AuthEventMessage>,
}

impl AuthObserver {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next forwarded event. `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        let _ = ractor::cast!(self.bus, AuthEventMessage::Unsubscribe(self.id));
    }
}

struct AuthEventState {
    synchronizer: Arc<ProfileSynchronizer>,
    sessions: Arc<dyn SessionStore>,
    next_id: u64,
    observers: BTreeMap<u64, mpsc::UnboundedSender<AuthEvent>>,
}

impl AuthEventState {
    fn forward(&mut self, event: AuthEvent) {
        self.observers.retain(|id, tx| {
            let open = tx.send(event.clone()).is_ok();
            if !open {
                debug!(observer = id, "observer gone; dropping registration");
            }
            open
        });
    }
}

struct AuthEventActor;

struct AuthEventArgs {
    synchronizer: Arc<ProfileSynchronizer>,
    sessions: Arc<dyn SessionStore>,
}

#[ractor::async_trait]
impl Actor for AuthEventActor {
    type Msg = AuthEventMessage;
    type State = AuthEventState;
    type Arguments = AuthEventArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(AuthEventState {
            synchronizer: args.synchronizer,
            sessions: args.sessions,
            next_id: 0,
            observers: BTreeMap::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AuthEventMessage::Provider(change) => {
                self.handle_change(state, change).await;
            }
            AuthEventMessage::Subscribe(reply) => {
                let id = state.next_id;
                state.next_id += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                state.observers.insert(id, tx);
                debug!(observer = id, total = state.observers.len(), "observer registered");
                let _ = reply.send(AuthObserver { id, rx, bus: myself });
            }
            AuthEventMessage::Unsubscribe(id) => {
                if state.observers.remove(&id).is_some() {
                    debug!(observer = id, "observer unregistered");
                }
            }
        }
        Ok(())
    }
}

impl AuthEventActor {
    /// Apply one provider change to local state, then forward it. Runs to
    /// completion before the next message is taken from the mailbox.
    async fn handle_change(&self, state: &mut AuthEventState, change: SessionChange) {
        let SessionChange {
            event,
            identity,
            session,
        } = change;

        let profile = match event {
            SessionEvent::SignedIn | SessionEvent::UserUpdated => {
                if let Some(session) = session.clone()
                    && let Err(e) = state.sessions.set(session).await
                {
                    warn!(?event, "storing session failed: {}", e);
                }
                match identity.as_ref() {
                    Some(identity) => {
                        let result = state.synchronizer.sync(identity).await;
                        Some(ProfileSyncStatus::from_result(&result))
                    }
                    None => None,
                }
            }
            SessionEvent::TokenRefreshed => {
                if let Some(session) = session.clone()
                    && let Err(e) = state.sessions.set(session).await
                {
                    warn!("storing refreshed session failed: {}", e);
                }
                None
            }
            SessionEvent::SignedOut => {
                if let Err(e) = state.sessions.clear().await {
                    warn!("clearing session failed: {}", e);
                }
                None
            }
        };

        debug!(
            ?event,
            observers = state.observers.len(),
            synced = profile.as_ref().map(ProfileSyncStatus::is_synced),
            "forwarding auth event"
        );
        state.forward(AuthEvent {
            event,
            identity,
            session,
            profile,
        });
    }
}

/// Bridges provider session changes to local state and observers.
///
/// Holds the provider subscription for its whole lifetime. Changes are
/// queued into one actor mailbox and handled strictly in arrival order.
pub struct AuthEventBus {
    actor: ActorRef<AuthEventMessage>,
    subscription: Mutex<Option<Subscription>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl AuthEventBus {
    pub async fn start(
        provider: &dyn IdentityProvider,
        synchronizer: Arc<ProfileSynchronizer>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, AuthSyncError> {
        let (actor, join) = Actor::spawn(
            None,
            AuthEventActor,
            AuthEventArgs {
                synchronizer,
                sessions,
            },
        )
        .await
        .map_err(|e| AuthSyncError::RactorError(format!("spawn auth event bus failed: {e}")))?;

        let target = actor.clone();
        let subscription = provider.on_session_change(Arc::new(move |change: SessionChange| {
            if ractor::cast!(target, AuthEventMessage::Provider(change)).is_err() {
                debug!("auth event bus stopped; session change dropped");
            }
        }));
        info!(subscription = subscription.id(), "auth event bus started");

        Ok(Self {
            actor,
            subscription: Mutex::new(Some(subscription)),
            join: Mutex::new(Some(join)),
        })
    }

    pub async fn subscribe(&self) -> Result<AuthObserver, AuthSyncError> {
        ractor::call!(self.actor, AuthEventMessage::Subscribe)
            .map_err(|e| AuthSyncError::RactorError(format!("Subscribe RPC failed: {e}")))
    }

    /// Unsubscribe from the provider and stop the actor once its current
    /// message is handled. Idempotent.
    pub async fn shutdown(&self) {
        let join = self.stop();
        if let Some(join) = join {
            let _ = join.await;
            info!("auth event bus stopped");
        }
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            self.actor.stop(None);
        }
        self.join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for AuthEventBus {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
