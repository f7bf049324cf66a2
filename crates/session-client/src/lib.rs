//! Session lifecycle and event demultiplexing.
//!
//! [`SessionClient`] wraps one authenticated collaborator connection: it
//! resumes or creates a session, boots the cryptographic subsystem before
//! the stream starts, persists credentials, and splits the live event
//! stream into the room-event path (single-slot sink) and the
//! verification path (deduplicated, collision-checked forwarding into the
//! coordinator).

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use serde_json::json;
use session_core::{
    ClientEvent, Connection, CreateRoomOptions, Credentials, RemoteError, RoomEvent, RoomSnapshot,
    SessionError, SessionInfo, SubscriptionToken, VerificationCoordinator, classify_login_failure,
};
use session_platform::{CredentialStore, CredentialStoreError, ScopedCredentialStore};
use tracing::{debug, error, info, trace, warn};

/// Service name under which credentials are persisted.
const CREDENTIAL_SERVICE: &str = "org.fernchat.session";
/// Single-session-per-device account key.
const SESSION_ACCOUNT: &str = "current-session";
/// Bounded history depth requested when the live stream starts.
const INITIAL_BACKLOG_DEPTH: u16 = 10;

type RoomEventSink = dyn Fn(Option<&RoomEvent>, &RoomSnapshot) + Send + Sync;

#[derive(Default)]
struct LifecycleState {
    established: bool,
    session: Option<Credentials>,
    stream_sub: Option<SubscriptionToken>,
}

/// Shared by the demux callback; outlives individual subscriptions.
struct ClientShared<C: ?Sized> {
    verification: VerificationCoordinator,
    sink: Mutex<Option<Arc<RoomEventSink>>>,
    seen_requests: Mutex<HashSet<String>>,
    conn: Arc<C>,
}

impl<C: Connection + ?Sized> ClientShared<C> {
    fn dispatch(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Room {
                room_id,
                event,
                historical,
            } => {
                if *historical {
                    trace!(%room_id, "historical event dropped at demux");
                    return;
                }
                let Some(room) = self.conn.room(room_id) else {
                    trace!(%room_id, "event for unknown room dropped");
                    return;
                };
                let sink = lock(&self.sink).clone();
                if let Some(sink) = sink.as_deref() {
                    sink(event.as_ref(), &room);
                }
            }
            ClientEvent::Verification(request) => {
                let flow_id = request.flow_id();
                if !lock(&self.seen_requests).insert(flow_id.clone()) {
                    debug!(%flow_id, "duplicate verification request dropped");
                    return;
                }
                if self.verification.is_active() {
                    debug!(%flow_id, "verification request dropped: attempt already active");
                    return;
                }
                self.verification.on_incoming_request(Arc::clone(request));
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One authenticated connection with start/stop lifecycle.
///
/// Must be created inside a tokio runtime (the verification coordinator
/// spawns its watchers on the ambient handle).
pub struct SessionClient<C: Connection + ?Sized, S: CredentialStore> {
    shared: Arc<ClientShared<C>>,
    store: ScopedCredentialStore<S>,
    state: Mutex<LifecycleState>,
}

impl<C: Connection + ?Sized, S: CredentialStore> SessionClient<C, S> {
    /// Wrap a collaborator connection and a credential store.
    pub fn new(conn: Arc<C>, store: S) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                verification: VerificationCoordinator::new(),
                sink: Mutex::new(None),
                seen_requests: Mutex::new(HashSet::new()),
                conn,
            }),
            store: ScopedCredentialStore::new(store, CREDENTIAL_SERVICE),
            state: Mutex::new(LifecycleState::default()),
        }
    }

    /// Resume a session from persisted credentials.
    ///
    /// Returns `Ok(false)` when no complete credential bundle exists; a
    /// complete bundle establishes the live connection. Never partially
    /// starts: any establishment failure propagates with nothing attached.
    pub async fn resume(&self) -> Result<bool, SessionError> {
        let raw = match self.store.get(SESSION_ACCOUNT) {
            Ok(raw) => raw,
            Err(CredentialStoreError::NotFound) => {
                debug!("no persisted session; resume skipped");
                return Ok(false);
            }
            Err(err) => return Err(SessionError::Store(err.to_string())),
        };

        let credentials: Credentials = serde_json::from_str(&raw)
            .map_err(|err| SessionError::Store(format!("stored session is unreadable: {err}")))?;
        if !credentials.is_complete() {
            warn!("persisted session is incomplete; resume skipped");
            return Ok(false);
        }

        self.establish(credentials).await?;
        info!("session resumed from persisted credentials");
        Ok(true)
    }

    /// One-shot password login, credential persistence, then establishment.
    ///
    /// Credentials are persisted before the connection is established, so a
    /// persistence failure never leaves a live connection behind.
    pub async fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionInfo, SessionError> {
        let credentials = self
            .shared
            .conn
            .login(base_url, username, password)
            .await
            .map_err(|err| {
                warn!(%err, "login failed");
                SessionError::Auth(classify_login_failure(&err))
            })?;

        self.persist(&credentials)?;
        self.establish(credentials.clone()).await?;

        info!(user_id = %credentials.user_id, device_id = %credentials.device_id, "login complete");
        Ok(SessionInfo::from(credentials))
    }

    /// Boot crypto, attach the demultiplexer, and open the live stream.
    ///
    /// Idempotent: calling while established is a no-op. The crypto
    /// subsystem is ready before the first event can be dispatched. A
    /// stale-store crypto failure triggers the destructive local reset and
    /// fails with [`SessionError::RestartRequired`].
    pub async fn establish(&self, credentials: Credentials) -> Result<(), SessionError> {
        if lock(&self.state).established {
            debug!("session already established");
            return Ok(());
        }

        if let Err(err) = self.shared.conn.init_crypto().await {
            if err.is_stale_store() {
                // Deliberate data-loss recovery: drop all cached crypto
                // material and demand a restart. Never silent.
                error!(%err, "stale local crypto store; dropping all cached crypto material");
                if let Err(clear_err) = self.shared.conn.clear_crypto_state().await {
                    error!(%clear_err, "failed to clear local crypto state");
                }
                return Err(SessionError::RestartRequired);
            }
            return Err(SessionError::Crypto(err));
        }

        let token = self.attach_demux();
        if let Err(err) = self
            .shared
            .conn
            .establish_stream(&credentials, INITIAL_BACKLOG_DEPTH)
            .await
        {
            drop(token);
            return Err(SessionError::Connection(err));
        }

        let mut state = lock(&self.state);
        state.stream_sub = Some(token);
        state.session = Some(credentials);
        state.established = true;
        Ok(())
    }

    /// Register the room-event sink.
    ///
    /// Single-slot: a second registration replaces the first. Fan-out, if
    /// needed, is the caller's responsibility.
    pub fn register_room_event_sink(
        &self,
        sink: impl Fn(Option<&RoomEvent>, &RoomSnapshot) + Send + Sync + 'static,
    ) {
        *lock(&self.shared.sink) = Some(Arc::new(sink));
    }

    /// Tear down the live connection and clear persisted session state.
    ///
    /// Idempotent and safe to call with no active session.
    pub async fn stop(&self) {
        let was_established = {
            let mut state = lock(&self.state);
            state.stream_sub = None;
            state.session = None;
            std::mem::replace(&mut state.established, false)
        };

        if was_established {
            self.shared.conn.stop().await;
        }
        if let Err(err) = self.store.clear(SESSION_ACCOUNT) {
            warn!(%err, "failed to clear persisted session");
        }
        if was_established {
            info!("session stopped");
        }
    }

    /// Send a plain text message into a room.
    pub async fn send_message(&self, room_id: &str, body: &str) -> Result<(), RemoteError> {
        self.shared
            .conn
            .send_event(
                room_id,
                "m.room.message",
                json!({ "msgtype": "m.text", "body": body }),
            )
            .await
    }

    /// Create a room through the collaborator.
    pub async fn create_room(&self, options: CreateRoomOptions) -> Result<String, RemoteError> {
        self.shared.conn.create_room(options).await
    }

    /// Join a room by ID or alias.
    pub async fn join_room(&self, room_id_or_alias: &str) -> Result<(), RemoteError> {
        self.shared.conn.join_room(room_id_or_alias).await
    }

    /// The verification coordinator fed by this client.
    pub fn verification(&self) -> &VerificationCoordinator {
        &self.shared.verification
    }

    /// The underlying collaborator connection.
    pub fn connection(&self) -> Arc<C> {
        Arc::clone(&self.shared.conn)
    }

    /// Caller-facing view of the current session, when established.
    pub fn session(&self) -> Option<SessionInfo> {
        lock(&self.state).session.clone().map(SessionInfo::from)
    }

    /// Whether the live connection is established.
    pub fn is_established(&self) -> bool {
        lock(&self.state).established
    }

    fn persist(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let encoded = serde_json::to_string(credentials)
            .map_err(|err| SessionError::Store(format!("session serialize error: {err}")))?;
        self.store
            .set(SESSION_ACCOUNT, &encoded)
            .map_err(|err| SessionError::Store(err.to_string()))
    }

    fn attach_demux(&self) -> SubscriptionToken {
        let weak = Arc::downgrade(&self.shared);
        self.shared.conn.event_bus().subscribe(move |event| {
            let Some(shared) = weak.upgrade() else { return };
            shared.dispatch(event);
        })
    }
}
